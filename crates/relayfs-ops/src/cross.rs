//! Copy and move between two possibly different backends.
//!
//! Nothing here assumes the source and destination share a representation:
//! bytes are streamed through `read`/`write` and directories are rebuilt
//! entry by entry. The first error at any depth aborts the whole transfer.
//! Items already transferred stay at the destination; there is no rollback.

use std::fmt;
use std::sync::Arc;

use relayfs_core::{
    FileError, FileHandle, FileInfo, FileResult, FileSystemBackend, FileSystemPath, OpenFlags,
    OperationContext, TransferOptions,
};

/// Which transfer to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Copy,
    Move,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Move => write!(f, "move"),
        }
    }
}

/// A single copy or move from `src` to `dest`.
pub struct CrossBackendHelper<S: ?Sized, D: ?Sized> {
    ctx: Arc<OperationContext>,
    src: Arc<S>,
    dest: Arc<D>,
    src_path: FileSystemPath,
    dest_path: FileSystemPath,
    operation: Operation,
    options: TransferOptions,
}

impl<S, D> CrossBackendHelper<S, D>
where
    S: FileSystemBackend + ?Sized,
    D: FileSystemBackend + ?Sized,
{
    pub fn new(
        ctx: Arc<OperationContext>,
        src: Arc<S>,
        dest: Arc<D>,
        src_path: FileSystemPath,
        dest_path: FileSystemPath,
        operation: Operation,
    ) -> Self {
        Self {
            ctx,
            src,
            dest,
            src_path,
            dest_path,
            operation,
            options: TransferOptions::default(),
        }
    }

    /// Override the default transfer options.
    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the transfer synchronously. Returns the first error encountered.
    pub fn do_work(&self) -> FileResult<()> {
        let result = self.prepare().and_then(|info| {
            if info.is_directory {
                self.transfer_directory(&self.src_path, &self.dest_path)
            } else {
                self.transfer_file(&self.src_path, &self.dest_path, &info)
            }
        });

        if let Err(e) = &result {
            tracing::warn!(
                op = %self.ctx.id(),
                operation = %self.operation,
                src = %self.src_path,
                dest = %self.dest_path,
                "transfer aborted: {e}"
            );
        }
        result
    }

    /// Whether source and destination see the same files, either through one
    /// instance or through two instances over the same storage.
    fn same_namespace(&self) -> bool {
        if std::ptr::addr_eq(Arc::as_ptr(&self.src), Arc::as_ptr(&self.dest)) {
            return true;
        }
        match (self.src.namespace(), self.dest.namespace()) {
            (Some(src), Some(dest)) => src == dest,
            _ => false,
        }
    }

    /// Validate the request and make sure the destination parent exists.
    fn prepare(&self) -> FileResult<FileInfo> {
        let ctx = &*self.ctx;

        if self.same_namespace()
            && (self.src_path == self.dest_path || self.src_path.is_ancestor_of(&self.dest_path))
        {
            return Err(FileError::InvalidOperation);
        }
        if self.operation == Operation::Move && self.src_path.is_root() {
            return Err(FileError::InvalidOperation);
        }

        let src_info = self.src.get_file_info(ctx, &self.src_path)?.info;
        ensure_not_linked_directory(&src_info)?;

        match self.dest.get_file_info(ctx, &self.dest_path) {
            Ok(reply) => {
                let dest_info = reply.info;
                if src_info.is_directory != dest_info.is_directory {
                    return Err(FileError::InvalidOperation);
                }
                if dest_info.is_directory
                    && !self.dest.read_directory(ctx, &self.dest_path)?.is_empty()
                {
                    return Err(FileError::NotEmpty);
                }
            }
            Err(FileError::NotFound) => {
                if let Some(parent) = self.dest_path.parent() {
                    self.dest.create_directory(ctx, &parent, false, true)?;
                }
            }
            Err(e) => return Err(e),
        }

        Ok(src_info)
    }

    fn transfer_file(
        &self,
        src: &FileSystemPath,
        dest: &FileSystemPath,
        info: &FileInfo,
    ) -> FileResult<()> {
        let ctx = &*self.ctx;

        let src_file = self
            .src
            .create_or_open(ctx, src, OpenFlags::OPEN | OpenFlags::READ)?;
        let dest_file = match self.dest.create_or_open(
            ctx,
            dest,
            OpenFlags::CREATE_ALWAYS | OpenFlags::WRITE,
        ) {
            Ok(opened) => opened,
            Err(e) => {
                if let Err(close_err) = self.src.close(ctx, src_file.handle) {
                    tracing::warn!(
                        op = %self.ctx.id(),
                        %src,
                        "failed to close source after aborted open: {close_err}"
                    );
                }
                return Err(e);
            }
        };

        let streamed = self.stream(src_file.handle, dest_file.handle);
        let dest_closed = self.dest.close(ctx, dest_file.handle);
        let src_closed = self.src.close(ctx, src_file.handle);
        let bytes = streamed?;
        dest_closed?;
        src_closed?;

        if self.options.preserve_timestamps {
            self.dest
                .touch(ctx, dest, info.last_accessed, info.last_modified)?;
        }

        // The destination is complete; only now may the source go.
        if self.operation == Operation::Move {
            self.src.delete(ctx, src, false)?;
        }

        tracing::debug!(
            op = %self.ctx.id(),
            operation = %self.operation,
            %src,
            %dest,
            bytes,
            "transferred file"
        );
        Ok(())
    }

    fn transfer_directory(&self, src: &FileSystemPath, dest: &FileSystemPath) -> FileResult<()> {
        let ctx = &*self.ctx;

        self.dest.create_directory(ctx, dest, false, false)?;

        for entry in self.src.read_directory(ctx, src)? {
            let child_src = src.join(entry.name.as_str());
            let child_dest = dest.join(entry.name.as_str());
            let info = self.src.get_file_info(ctx, &child_src)?.info;
            ensure_not_linked_directory(&info)?;
            if info.is_directory {
                self.transfer_directory(&child_src, &child_dest)?;
            } else {
                self.transfer_file(&child_src, &child_dest, &info)?;
            }
        }

        // Every child has been moved out, so the directory is empty.
        if self.operation == Operation::Move {
            self.src.delete(ctx, src, false)?;
        }

        tracing::debug!(
            op = %self.ctx.id(),
            operation = %self.operation,
            %src,
            %dest,
            "transferred directory"
        );
        Ok(())
    }

    /// Copy every byte of `src` into `dest`, returning the byte count.
    fn stream(&self, src: FileHandle, dest: FileHandle) -> FileResult<u64> {
        let ctx = &*self.ctx;
        let mut buf = vec![0u8; self.options.buffer_size.max(1)];
        let mut offset = 0u64;

        loop {
            let read = self.src.read(ctx, src, offset, &mut buf)?;
            if read == 0 {
                return Ok(offset);
            }

            let mut written = 0;
            while written < read {
                let n = self
                    .dest
                    .write(ctx, dest, offset + written as u64, &buf[written..read])?;
                if n == 0 {
                    return Err(FileError::NoSpace);
                }
                written += n;
            }
            offset += read as u64;
        }
    }
}

/// A link to a directory is never walked: its children live outside the
/// tree being transferred, and a move would delete them.
fn ensure_not_linked_directory(info: &FileInfo) -> FileResult<()> {
    if info.is_symbolic_link && info.is_directory {
        Err(FileError::InvalidOperation)
    } else {
        Ok(())
    }
}

impl<S: ?Sized, D: ?Sized> fmt::Debug for CrossBackendHelper<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossBackendHelper")
            .field("src_path", &self.src_path)
            .field("dest_path", &self.dest_path)
            .field("operation", &self.operation)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
