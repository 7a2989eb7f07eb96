//! Asynchronous file operation dispatch for relayfs.
//!
//! Every operation in [`proxy`] takes a storage backend, runs the blocking
//! backend call on a worker thread, and delivers the result to a callback on
//! the context that submitted it. Cross-backend copy and move stream data
//! through the generic backend interface, so any two backends can be mixed.

mod cross;
mod helpers;
mod opened;
pub mod proxy;
mod runner;

pub use cross::{CrossBackendHelper, Operation};
pub use opened::OpenedFile;
pub use proxy::{
    CreateOrOpenCallback, EnsureFileExistsCallback, GetFileInfoCallback, ReadDirectoryCallback,
    StatusCallback,
};
pub use runner::{
    post_task_and_reply_with_result, Relay, ReplyHandle, ReplyLoop, RunnerError, Task, TaskRunner,
    WorkerPool,
};
