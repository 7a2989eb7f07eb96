//! Dispatch entry points.
//!
//! Each function submits exactly one operation to `runner` and returns
//! whether the submission was accepted. When it returns `true` the callback
//! runs exactly once, later, on the originating context. When it returns
//! `false` the callback is dropped without running and nothing was started.
//!
//! These functions do not validate, log, or check permissions; backend
//! results are forwarded unchanged. Backends and the context are shared
//! with the worker until the callback has run. No ordering is guaranteed
//! between two operations, even on the same path.

use std::sync::Arc;
use std::time::SystemTime;

use relayfs_core::{
    DirectoryListing, FileInfoReply, FileResult, FileSystemBackend, FileSystemPath, OpenFlags,
    OperationContext, TransferOptions,
};

use crate::cross::{CrossBackendHelper, Operation};
use crate::helpers::{
    relay, CopyOrMoveHelper, CreateOrOpenHelper, EnsureFileExistsHelper, GetFileInfoHelper,
    ReadDirectoryHelper, StatusHelper, Target,
};
use crate::opened::OpenedFile;
use crate::runner::TaskRunner;

/// Callback for operations that only report success or failure.
pub trait StatusCallback: FnOnce(FileResult<()>) + Send + 'static {}
impl<F> StatusCallback for F where F: FnOnce(FileResult<()>) + Send + 'static {}

/// Callback for [`create_or_open`].
pub trait CreateOrOpenCallback: FnOnce(FileResult<OpenedFile>) + Send + 'static {}
impl<F> CreateOrOpenCallback for F where F: FnOnce(FileResult<OpenedFile>) + Send + 'static {}

/// Callback for [`ensure_file_exists`]; receives whether the file was created.
pub trait EnsureFileExistsCallback: FnOnce(FileResult<bool>) + Send + 'static {}
impl<F> EnsureFileExistsCallback for F where F: FnOnce(FileResult<bool>) + Send + 'static {}

/// Callback for [`get_file_info`].
pub trait GetFileInfoCallback: FnOnce(FileResult<FileInfoReply>) + Send + 'static {}
impl<F> GetFileInfoCallback for F where F: FnOnce(FileResult<FileInfoReply>) + Send + 'static {}

/// Callback for [`read_directory`].
pub trait ReadDirectoryCallback: FnOnce(FileResult<DirectoryListing>) + Send + 'static {}
impl<F> ReadDirectoryCallback for F where
    F: FnOnce(FileResult<DirectoryListing>) + Send + 'static
{
}

fn target<B: ?Sized>(
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
) -> Target<B> {
    Target {
        ctx: Arc::clone(ctx),
        backend: Arc::clone(backend),
        path: path.clone(),
    }
}

/// Delete a file, or a directory (`recursive` for non-empty ones).
pub fn delete<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    recursive: bool,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let Target { ctx, backend, path } = target(ctx, backend, path);
    let helper = StatusHelper::new(move || backend.delete(&ctx, &path, recursive));
    relay(runner, helper, callback)
}

/// Create or open a file according to `flags`.
///
/// The callback receives an [`OpenedFile`] that closes itself on drop. If
/// the reply never gets to run, the handle is closed anyway.
pub fn create_or_open<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    flags: OpenFlags,
    callback: impl CreateOrOpenCallback,
) -> bool
where
    R: TaskRunner + Clone + 'static,
    B: FileSystemBackend + ?Sized + 'static,
{
    let helper = CreateOrOpenHelper::new(runner.clone(), target(ctx, backend, path), flags);
    relay(runner, helper, callback)
}

/// Copy `src_path` on `src_backend` to `dest_path` on `dest_backend`.
pub fn copy<R, S, D>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    src_backend: &Arc<S>,
    dest_backend: &Arc<D>,
    src_path: &FileSystemPath,
    dest_path: &FileSystemPath,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    S: FileSystemBackend + ?Sized + 'static,
    D: FileSystemBackend + ?Sized + 'static,
{
    copy_with_options(
        runner,
        ctx,
        src_backend,
        dest_backend,
        src_path,
        dest_path,
        TransferOptions::default(),
        callback,
    )
}

/// [`copy`] with explicit transfer options.
#[allow(clippy::too_many_arguments)]
pub fn copy_with_options<R, S, D>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    src_backend: &Arc<S>,
    dest_backend: &Arc<D>,
    src_path: &FileSystemPath,
    dest_path: &FileSystemPath,
    options: TransferOptions,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    S: FileSystemBackend + ?Sized + 'static,
    D: FileSystemBackend + ?Sized + 'static,
{
    let helper = CrossBackendHelper::new(
        Arc::clone(ctx),
        Arc::clone(src_backend),
        Arc::clone(dest_backend),
        src_path.clone(),
        dest_path.clone(),
        Operation::Copy,
    )
    .with_options(options);
    relay(runner, CopyOrMoveHelper::new(helper), callback)
}

/// Move `src_path` on `src_backend` to `dest_path` on `dest_backend`.
///
/// Each source item is removed only after its destination copy is complete.
pub fn move_to<R, S, D>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    src_backend: &Arc<S>,
    dest_backend: &Arc<D>,
    src_path: &FileSystemPath,
    dest_path: &FileSystemPath,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    S: FileSystemBackend + ?Sized + 'static,
    D: FileSystemBackend + ?Sized + 'static,
{
    move_with_options(
        runner,
        ctx,
        src_backend,
        dest_backend,
        src_path,
        dest_path,
        TransferOptions::default(),
        callback,
    )
}

/// [`move_to`] with explicit transfer options.
#[allow(clippy::too_many_arguments)]
pub fn move_with_options<R, S, D>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    src_backend: &Arc<S>,
    dest_backend: &Arc<D>,
    src_path: &FileSystemPath,
    dest_path: &FileSystemPath,
    options: TransferOptions,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    S: FileSystemBackend + ?Sized + 'static,
    D: FileSystemBackend + ?Sized + 'static,
{
    let helper = CrossBackendHelper::new(
        Arc::clone(ctx),
        Arc::clone(src_backend),
        Arc::clone(dest_backend),
        src_path.clone(),
        dest_path.clone(),
        Operation::Move,
    )
    .with_options(options);
    relay(runner, CopyOrMoveHelper::new(helper), callback)
}

/// Create an empty file unless one already exists.
pub fn ensure_file_exists<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    callback: impl EnsureFileExistsCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let helper = EnsureFileExistsHelper::new(target(ctx, backend, path));
    relay(runner, helper, callback)
}

/// Create a directory.
pub fn create_directory<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    exclusive: bool,
    recursive: bool,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let Target { ctx, backend, path } = target(ctx, backend, path);
    let helper =
        StatusHelper::new(move || backend.create_directory(&ctx, &path, exclusive, recursive));
    relay(runner, helper, callback)
}

/// Fetch metadata and the native path for `path`.
pub fn get_file_info<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    callback: impl GetFileInfoCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let helper = GetFileInfoHelper::new(target(ctx, backend, path));
    relay(runner, helper, callback)
}

/// List a directory. The listing is always complete (`has_more == false`).
pub fn read_directory<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    callback: impl ReadDirectoryCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let helper = ReadDirectoryHelper::new(target(ctx, backend, path));
    relay(runner, helper, callback)
}

/// Set the access and modification times of `path`.
#[allow(clippy::too_many_arguments)]
pub fn touch<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    last_access_time: SystemTime,
    last_modified_time: SystemTime,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let Target { ctx, backend, path } = target(ctx, backend, path);
    let helper = StatusHelper::new(move || {
        backend.touch(&ctx, &path, last_access_time, last_modified_time)
    });
    relay(runner, helper, callback)
}

/// Resize a regular file to `length` bytes.
pub fn truncate<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    path: &FileSystemPath,
    length: u64,
    callback: impl StatusCallback,
) -> bool
where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let Target { ctx, backend, path } = target(ctx, backend, path);
    let helper = StatusHelper::new(move || backend.truncate(&ctx, &path, length));
    relay(runner, helper, callback)
}
