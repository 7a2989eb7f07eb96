//! Core types and traits for relayfs.
//!
//! This crate provides the data model shared by the dispatch layer and the
//! storage backends: virtual paths, per-call operation context, the error
//! taxonomy, and the [`FileSystemBackend`] capability trait.

mod backend;
mod config;
mod context;
mod error;
mod info;
mod path;

pub use backend::{FileSystemBackend, Opened};
pub use config::{RelayConfig, RelayConfigBuilder, TransferOptions, DEFAULT_BUFFER_SIZE};
pub use context::{OperationContext, OperationId};
pub use error::{FileError, FileResult};
pub use info::{DirectoryListing, Entry, FileHandle, FileInfo, FileInfoReply, OpenFlags};
pub use path::FileSystemPath;
