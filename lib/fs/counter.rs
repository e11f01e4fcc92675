//! The integer cell backing every counter file.

use crate::sync::atomic::{AtomicI64, Ordering};

/// An atomically mutable signed counter.
///
/// Each counter file owns exactly one cell. Open handles only hold a weak reference to it, so the
/// cell goes away together with its file.
#[derive(Debug, Default)]
pub struct CounterCell {
    value: AtomicI64,
}

impl CounterCell {
    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    /// Returns the current value and increments the cell by one.
    ///
    /// Concurrent callers each observe a distinct value; the increment wraps on overflow.
    pub fn read_and_increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Overwrites the stored value.
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Returns the current value without side effects.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Formats `value` the way a read presents it: minimal decimal followed by a newline.
#[must_use]
pub fn render(value: i64) -> String {
    format!("{value}\n")
}
