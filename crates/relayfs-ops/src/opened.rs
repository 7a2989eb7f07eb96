//! Owned file handles delivered by `create_or_open`.

use std::fmt;
use std::sync::Arc;

use relayfs_core::{FileHandle, FileSystemBackend, OperationContext};

use crate::runner::TaskRunner;

type Closer = Box<dyn FnOnce(FileHandle) + Send + 'static>;

/// A file opened through the dispatch layer.
///
/// Dropping it closes the handle through its backend on the worker context.
/// Call [`OpenedFile::into_handle`] to take over responsibility for closing.
pub struct OpenedFile {
    handle: FileHandle,
    created: bool,
    closer: Option<Closer>,
}

impl OpenedFile {
    pub(crate) fn new<R, B>(
        runner: R,
        ctx: Arc<OperationContext>,
        backend: Arc<B>,
        handle: FileHandle,
        created: bool,
    ) -> Self
    where
        R: TaskRunner + 'static,
        B: FileSystemBackend + ?Sized + 'static,
    {
        Self {
            handle,
            created,
            closer: Some(Box::new(move |handle| {
                close_on_worker(&runner, &ctx, &backend, handle)
            })),
        }
    }

    /// The backend handle.
    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    /// Whether the open created the file.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Release ownership of the handle without closing it.
    pub fn into_handle(mut self) -> FileHandle {
        self.closer = None;
        self.handle
    }

    /// Close the handle now. Equivalent to dropping the value.
    pub fn close(self) {}
}

impl Drop for OpenedFile {
    fn drop(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer(self.handle);
        }
    }
}

impl fmt::Debug for OpenedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedFile")
            .field("handle", &self.handle)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

/// Close `handle` on the worker context, or inline if the worker refuses
/// the task.
pub(crate) fn close_on_worker<R, B>(
    runner: &R,
    ctx: &Arc<OperationContext>,
    backend: &Arc<B>,
    handle: FileHandle,
) where
    R: TaskRunner + ?Sized,
    B: FileSystemBackend + ?Sized + 'static,
{
    let task_ctx = Arc::clone(ctx);
    let task_backend = Arc::clone(backend);
    let posted = runner.post_task(Box::new(move || {
        if let Err(e) = task_backend.close(&task_ctx, handle) {
            tracing::warn!(backend = task_backend.name(), ?handle, "close failed: {e}");
        }
    }));

    if !posted {
        tracing::debug!(backend = backend.name(), ?handle, "worker unavailable, closing inline");
        if let Err(e) = backend.close(ctx, handle) {
            tracing::warn!(backend = backend.name(), ?handle, "close failed: {e}");
        }
    }
}
