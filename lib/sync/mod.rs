//! Synchronization primitives.
//!
//! Shims between loom and std synchronization primitives.

/// Atomics used by counter cells and address allocation.
pub mod atomic {
    #[cfg(loom)]
    pub use loom::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    #[cfg(not(loom))]
    pub use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
}

#[cfg(loom)]
pub use loom::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(not(loom))]
pub use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// None of the state guarded in this crate can be left half-updated by a panic, so poisoning
/// carries no information worth propagating.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Shared-locks `rw`, ignoring poisoning like [`lock`].
pub fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Exclusively locks `rw`, ignoring poisoning like [`lock`].
pub fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
