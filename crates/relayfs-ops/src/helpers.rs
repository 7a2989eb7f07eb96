//! One-shot helpers that carry a single operation across the worker boundary.
//!
//! A helper is created on the calling context, moved to the worker where
//! `run_work` stores the backend's result inside it, then moved back and
//! consumed by `reply`. Each phase owns the helper exclusively.

use std::sync::Arc;

use relayfs_core::{
    DirectoryListing, FileError, FileInfoReply, FileResult, FileSystemBackend, FileSystemPath,
    OpenFlags, Opened, OperationContext,
};

use crate::cross::CrossBackendHelper;
use crate::opened::{close_on_worker, OpenedFile};
use crate::runner::{post_task_and_reply_with_result, TaskRunner};

pub(crate) trait OperationHelper: Send + 'static {
    type Output: Send + 'static;

    /// Run the blocking backend call. Never invokes the callback.
    fn run_work(&mut self);

    /// Hand the captured result over to the caller.
    fn into_result(self) -> FileResult<Self::Output>;

    fn reply<F>(self, callback: F)
    where
        Self: Sized,
        F: FnOnce(FileResult<Self::Output>),
    {
        callback(self.into_result());
    }
}

/// Submit `helper` to `runner` and deliver its result to `callback`.
///
/// If the work panics the callback still runs, with `Abort`.
pub(crate) fn relay<R, H, F>(runner: &R, helper: H, callback: F) -> bool
where
    R: TaskRunner + ?Sized,
    H: OperationHelper,
    F: FnOnce(FileResult<H::Output>) + Send + 'static,
{
    post_task_and_reply_with_result(
        runner,
        move || {
            let mut helper = helper;
            helper.run_work();
            helper
        },
        move |helper: Option<H>| match helper {
            Some(helper) => helper.reply(callback),
            None => callback(Err(FileError::Abort)),
        },
    )
}

type StatusWork = Box<dyn FnOnce() -> FileResult<()> + Send + 'static>;

/// Runs a backend call that only reports success or failure.
pub(crate) struct StatusHelper {
    work: Option<StatusWork>,
    result: FileResult<()>,
}

impl StatusHelper {
    pub(crate) fn new(work: impl FnOnce() -> FileResult<()> + Send + 'static) -> Self {
        Self {
            work: Some(Box::new(work)),
            result: Err(FileError::Abort),
        }
    }
}

impl OperationHelper for StatusHelper {
    type Output = ();

    fn run_work(&mut self) {
        if let Some(work) = self.work.take() {
            self.result = work();
        }
    }

    fn into_result(self) -> FileResult<()> {
        self.result
    }
}

/// Shared inputs of the single-backend helpers.
pub(crate) struct Target<B: ?Sized> {
    pub(crate) ctx: Arc<OperationContext>,
    pub(crate) backend: Arc<B>,
    pub(crate) path: FileSystemPath,
}

pub(crate) struct EnsureFileExistsHelper<B: ?Sized> {
    target: Target<B>,
    result: FileResult<bool>,
}

impl<B: ?Sized> EnsureFileExistsHelper<B> {
    pub(crate) fn new(target: Target<B>) -> Self {
        Self {
            target,
            result: Err(FileError::Abort),
        }
    }
}

impl<B: FileSystemBackend + ?Sized + 'static> OperationHelper for EnsureFileExistsHelper<B> {
    type Output = bool;

    fn run_work(&mut self) {
        let Target { ctx, backend, path } = &self.target;
        self.result = backend.ensure_file_exists(ctx, path);
    }

    fn into_result(self) -> FileResult<bool> {
        self.result
    }
}

pub(crate) struct GetFileInfoHelper<B: ?Sized> {
    target: Target<B>,
    result: FileResult<FileInfoReply>,
}

impl<B: ?Sized> GetFileInfoHelper<B> {
    pub(crate) fn new(target: Target<B>) -> Self {
        Self {
            target,
            result: Err(FileError::Abort),
        }
    }
}

impl<B: FileSystemBackend + ?Sized + 'static> OperationHelper for GetFileInfoHelper<B> {
    type Output = FileInfoReply;

    fn run_work(&mut self) {
        let Target { ctx, backend, path } = &self.target;
        self.result = backend.get_file_info(ctx, path);
    }

    fn into_result(self) -> FileResult<FileInfoReply> {
        self.result
    }
}

pub(crate) struct ReadDirectoryHelper<B: ?Sized> {
    target: Target<B>,
    result: FileResult<DirectoryListing>,
}

impl<B: ?Sized> ReadDirectoryHelper<B> {
    pub(crate) fn new(target: Target<B>) -> Self {
        Self {
            target,
            result: Err(FileError::Abort),
        }
    }
}

impl<B: FileSystemBackend + ?Sized + 'static> OperationHelper for ReadDirectoryHelper<B> {
    type Output = DirectoryListing;

    fn run_work(&mut self) {
        let Target { ctx, backend, path } = &self.target;
        // Listings are never paginated.
        self.result = backend
            .read_directory(ctx, path)
            .map(DirectoryListing::complete);
    }

    fn into_result(self) -> FileResult<DirectoryListing> {
        self.result
    }
}

/// Opens a file and guarantees the handle is closed if nobody takes it.
pub(crate) struct CreateOrOpenHelper<R, B>
where
    R: TaskRunner + Clone + 'static,
    B: FileSystemBackend + ?Sized + 'static,
{
    runner: R,
    target: Target<B>,
    flags: OpenFlags,
    result: Option<FileResult<Opened>>,
}

impl<R, B> CreateOrOpenHelper<R, B>
where
    R: TaskRunner + Clone + 'static,
    B: FileSystemBackend + ?Sized + 'static,
{
    pub(crate) fn new(runner: R, target: Target<B>, flags: OpenFlags) -> Self {
        Self {
            runner,
            target,
            flags,
            result: None,
        }
    }
}

impl<R, B> OperationHelper for CreateOrOpenHelper<R, B>
where
    R: TaskRunner + Clone + 'static,
    B: FileSystemBackend + ?Sized + 'static,
{
    type Output = OpenedFile;

    fn run_work(&mut self) {
        let Target { ctx, backend, path } = &self.target;
        self.result = Some(backend.create_or_open(ctx, path, self.flags));
    }

    fn into_result(mut self) -> FileResult<OpenedFile> {
        let opened = self.result.take().unwrap_or(Err(FileError::Abort))?;
        Ok(OpenedFile::new(
            self.runner.clone(),
            Arc::clone(&self.target.ctx),
            Arc::clone(&self.target.backend),
            opened.handle,
            opened.created,
        ))
    }
}

impl<R, B> Drop for CreateOrOpenHelper<R, B>
where
    R: TaskRunner + Clone + 'static,
    B: FileSystemBackend + ?Sized + 'static,
{
    fn drop(&mut self) {
        // The reply never ran, so nobody owns the handle.
        if let Some(Ok(opened)) = self.result.take() {
            close_on_worker(
                &self.runner,
                &self.target.ctx,
                &self.target.backend,
                opened.handle,
            );
        }
    }
}

pub(crate) struct CopyOrMoveHelper<S: ?Sized, D: ?Sized> {
    helper: CrossBackendHelper<S, D>,
    result: FileResult<()>,
}

impl<S: ?Sized, D: ?Sized> CopyOrMoveHelper<S, D> {
    pub(crate) fn new(helper: CrossBackendHelper<S, D>) -> Self {
        Self {
            helper,
            result: Err(FileError::Abort),
        }
    }
}

impl<S, D> OperationHelper for CopyOrMoveHelper<S, D>
where
    S: FileSystemBackend + ?Sized + 'static,
    D: FileSystemBackend + ?Sized + 'static,
{
    type Output = ();

    fn run_work(&mut self) {
        self.result = self.helper.do_work();
    }

    fn into_result(self) -> FileResult<()> {
        self.result
    }
}
