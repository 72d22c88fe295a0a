//! Core type definitions for Depot

/// One stored file as reported by `LIST`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Decoded base name
    pub name: String,
    /// Size in bytes at the time of listing
    pub size: u64,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Access mode a storage operation needs on a name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockType {
    /// Multiple readers allowed
    Shared,
    /// Single writer, no readers
    Exclusive,
}
