//! Open instances of counter files.
//!
//! An [`OpenCounter`] ties one open/close cycle to the [`CounterCell`] of a counter file. It only
//! holds a weak reference: once the file is removed, or its mount session ends, the cell is gone
//! and every operation on the handle reports [`FsError::StaleHandle`].

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::fs::counter::{self, CounterCell};
use crate::fs::node::Node;
use crate::fs::{FileHandle, FsError, InodeAddr, ParseFailure};
use crate::sync::{self, Mutex};

/// Capacity of the per-handle write staging buffer. Longer payloads are truncated to it.
pub const SCRATCH_CAPACITY: usize = 12;

/// Fixed-size staging area for write payloads.
#[derive(Debug, Default)]
struct Scratch {
    buf: [u8; SCRATCH_CAPACITY],
    len: usize,
    /// File offset the current payload starts at.
    base: u64,
}

/// How a write was split between the scratch buffer and the truncated tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fill {
    kept: usize,
    dropped: usize,
}

impl Scratch {
    /// Copies `data` into the buffer at file offset `offset`.
    ///
    /// A write at offset zero, a write into an empty buffer, or a write before the current payload
    /// starts a new payload at `offset`. Gaps inside a payload are zero-filled.
    fn fill_at(&mut self, offset: u64, data: &[u8]) -> Fill {
        if offset == 0 || self.len == 0 || offset < self.base {
            self.len = 0;
            self.base = offset;
        }
        let start = usize::try_from(offset - self.base)
            .unwrap_or(usize::MAX)
            .min(SCRATCH_CAPACITY);
        let end = start.saturating_add(data.len()).min(SCRATCH_CAPACITY);
        let kept = end - start;
        if kept > 0 {
            if start > self.len {
                self.buf[self.len..start].fill(0);
            }
            self.buf[start..end].copy_from_slice(&data[..kept]);
            self.len = self.len.max(end);
        }
        Fill {
            kept,
            dropped: data.len() - kept,
        }
    }

    fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Decodes a write payload as a base-10 signed integer, tolerating surrounding whitespace.
pub fn parse_payload(bytes: &[u8]) -> Result<i64, ParseFailure> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseFailure::NotUtf8)?;
    let trimmed = text.trim_ascii();
    if trimmed.is_empty() {
        return Err(ParseFailure::Empty);
    }
    Ok(trimmed.parse::<i64>()?)
}

/// Returns the part of `buf` covered by `[offset, offset + size)`.
fn window(buf: &Bytes, offset: u64, size: u32) -> Bytes {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buf.len());
    let end = start.saturating_add(size as usize).min(buf.len());
    buf.slice(start..end)
}

/// One open instance of a counter file.
#[derive(Debug)]
pub struct OpenCounter {
    fh: FileHandle,
    addr: InodeAddr,
    cell: Weak<CounterCell>,
    /// Text produced by the last offset-zero read.
    snapshot: Mutex<Option<Bytes>>,
    scratch: Mutex<Scratch>,
}

impl OpenCounter {
    /// Binds a new handle to the cell of `node`. Fails with `IsADirectory` for directories.
    pub fn new(fh: FileHandle, node: &Node) -> Result<Self, FsError> {
        Ok(Self {
            fh,
            addr: node.addr(),
            cell: node.weak_cell()?,
            snapshot: Mutex::new(None),
            scratch: Mutex::new(Scratch::default()),
        })
    }

    /// The handle number given to the host.
    #[must_use]
    pub fn fh(&self) -> FileHandle {
        self.fh
    }

    /// Address of the file this handle was opened on.
    #[must_use]
    pub fn addr(&self) -> InodeAddr {
        self.addr
    }

    /// Returns `true` while the underlying cell still exists.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.cell.strong_count() > 0
    }

    fn cell(&self) -> Result<Arc<CounterCell>, FsError> {
        self.cell.upgrade().ok_or(FsError::StaleHandle)
    }

    /// Reads up to `size` bytes of the rendered counter starting at `offset`.
    ///
    /// A read at offset zero is a new logical read: it increments the counter once, regardless of
    /// `size`, and remembers the rendered pre-increment value. Reads at any other offset window
    /// that remembered text without touching the counter. Reading past the end yields no bytes.
    pub fn read(&self, offset: u64, size: u32) -> Result<Bytes, FsError> {
        let cell = self.cell()?;
        let mut snapshot = sync::lock(&self.snapshot);

        let text = if offset == 0 {
            let value = cell.read_and_increment();
            debug!(fh = self.fh, addr = self.addr, value, "counter read");
            snapshot.insert(Bytes::from(counter::render(value))).clone()
        } else {
            snapshot
                .get_or_insert_with(|| Bytes::from(counter::render(cell.get())))
                .clone()
        };
        Ok(window(&text, offset, size))
    }

    /// Stages `data` at `offset` and, if the staged payload parses, stores it in the counter.
    ///
    /// Always accounts for the whole payload: on success the full length is returned; on a
    /// malformed payload the counter is left untouched and [`FsError::Parse`] carries the same
    /// length in `consumed`. A write with no byte inside the buffer leaves the counter untouched.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let cell = self.cell()?;
        let mut scratch = sync::lock(&self.scratch);

        let Fill { kept, dropped } = scratch.fill_at(offset, data);
        if dropped > 0 {
            warn!(
                fh = self.fh,
                dropped,
                capacity = SCRATCH_CAPACITY,
                "write payload truncated"
            );
        }
        if kept == 0 {
            return Ok(data.len());
        }

        match parse_payload(scratch.payload()) {
            Ok(value) => {
                cell.set(value);
                debug!(fh = self.fh, addr = self.addr, value, "counter set");
                Ok(data.len())
            }
            Err(source) => {
                warn!(fh = self.fh, addr = self.addr, error = %source, "ignoring malformed write");
                Err(FsError::Parse {
                    consumed: data.len(),
                    source,
                })
            }
        }
    }
}
