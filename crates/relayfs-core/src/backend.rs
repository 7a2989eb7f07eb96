//! The capability set a storage backend exposes to the dispatch layer.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::{
    Entry, FileHandle, FileInfoReply, FileResult, FileSystemPath, OpenFlags, OperationContext,
};

/// Result of a successful `create_or_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub handle: FileHandle,
    /// Whether the call created the file.
    pub created: bool,
}

/// A concrete filesystem implementation.
///
/// Every method is synchronous and may block; the dispatch layer only ever
/// calls them from a worker context. Implementations must check
/// [`OperationContext::ensure_writable`] before mutating state.
pub trait FileSystemBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Create or open a regular file according to `flags`.
    fn create_or_open(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        flags: OpenFlags,
    ) -> FileResult<Opened>;

    /// Release a handle returned by `create_or_open`.
    fn close(&self, ctx: &OperationContext, handle: FileHandle) -> FileResult<()>;

    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at end of file.
    fn read(
        &self,
        ctx: &OperationContext,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> FileResult<usize>;

    /// Write `data` at `offset`, returning the number of bytes written.
    fn write(
        &self,
        ctx: &OperationContext,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
    ) -> FileResult<usize>;

    /// Create an empty file if none exists. Returns whether it was created.
    fn ensure_file_exists(&self, ctx: &OperationContext, path: &FileSystemPath)
    -> FileResult<bool>;

    /// Create a directory.
    ///
    /// With `exclusive`, an existing directory is an `Exists` error. With
    /// `recursive`, missing parents are created; otherwise a missing parent
    /// is `NotFound`.
    fn create_directory(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        exclusive: bool,
        recursive: bool,
    ) -> FileResult<()>;

    /// Metadata plus the native path backing `path`.
    fn get_file_info(&self, ctx: &OperationContext, path: &FileSystemPath)
    -> FileResult<FileInfoReply>;

    /// All entries of a directory, in no particular order.
    fn read_directory(&self, ctx: &OperationContext, path: &FileSystemPath)
    -> FileResult<Vec<Entry>>;

    /// Set access and modification times.
    fn touch(
        &self,
        ctx: &OperationContext,
        path: &FileSystemPath,
        last_access_time: SystemTime,
        last_modified_time: SystemTime,
    ) -> FileResult<()>;

    /// Set the length of a regular file, zero-extending if needed.
    fn truncate(&self, ctx: &OperationContext, path: &FileSystemPath, length: u64)
    -> FileResult<()>;

    /// Delete a file or directory. A non-empty directory requires
    /// `recursive`, otherwise the call fails with `NotEmpty`.
    fn delete(&self, ctx: &OperationContext, path: &FileSystemPath, recursive: bool)
    -> FileResult<()>;

    /// Identity of the storage behind this backend.
    ///
    /// Two backends reporting the same namespace see the same files. `None`
    /// means the storage is private to this instance.
    fn namespace(&self) -> Option<PathBuf> {
        None
    }
}
