//! File metadata, directory entries, and open flags.

use std::path::PathBuf;
use std::time::SystemTime;

use bitflags::bitflags;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Disposition and access flags for `create_or_open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        /// Create a new file; fail with `Exists` if present.
        const CREATE = 1 << 0;
        /// Open an existing file; fail with `NotFound` if absent.
        const OPEN = 1 << 1;
        /// Open, creating the file if absent.
        const OPEN_ALWAYS = 1 << 2;
        /// Create, truncating any existing file.
        const CREATE_ALWAYS = 1 << 3;
        /// Open an existing file and truncate it.
        const OPEN_TRUNCATED = 1 << 4;
        const READ = 1 << 5;
        const WRITE = 1 << 6;
        const APPEND = 1 << 7;
    }
}

impl OpenFlags {
    /// Whether this disposition may create the file.
    pub fn may_create(self) -> bool {
        self.intersects(Self::CREATE | Self::OPEN_ALWAYS | Self::CREATE_ALWAYS)
    }

    /// Whether an existing file is truncated on open.
    pub fn truncates(self) -> bool {
        self.intersects(Self::CREATE_ALWAYS | Self::OPEN_TRUNCATED)
    }

    /// Whether the handle will be used for writing.
    pub fn writes(self) -> bool {
        self.intersects(Self::WRITE | Self::APPEND) || self.truncates()
    }
}

/// Opaque handle to an open file, issued by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle(pub u64);

/// Metadata for a file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub is_directory: bool,
    pub is_symbolic_link: bool,
    pub last_modified: SystemTime,
    pub last_accessed: SystemTime,
    pub creation_time: SystemTime,
}

impl FileInfo {
    /// Metadata for a regular file with all timestamps set to `time`.
    pub fn file(size: u64, time: SystemTime) -> Self {
        Self {
            size,
            is_directory: false,
            is_symbolic_link: false,
            last_modified: time,
            last_accessed: time,
            creation_time: time,
        }
    }

    /// Metadata for a directory with all timestamps set to `time`.
    pub fn directory(time: SystemTime) -> Self {
        Self {
            is_directory: true,
            ..Self::file(0, time)
        }
    }
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: CompactString,
    pub is_directory: bool,
    pub size: u64,
    pub last_modified: SystemTime,
}

/// Payload of a successful `get_file_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfoReply {
    pub info: FileInfo,
    /// Native path backing the entry; empty when the backend has none.
    pub platform_path: PathBuf,
}

/// Payload of a successful `read_directory`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub entries: Vec<Entry>,
    /// Always `false`: listings are delivered in one piece.
    pub has_more: bool,
}

impl DirectoryListing {
    /// A complete listing.
    pub fn complete(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            has_more: false,
        }
    }
}
