//! countfs shared library.

/// In-memory counter filesystem: tree, sessions, handles and host adapters.
pub mod fs;
pub mod sync;
