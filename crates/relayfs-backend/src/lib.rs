//! Reference storage backends for relayfs.
//!
//! - [`LocalBackend`] maps virtual paths onto a directory on local disk.
//! - [`MemoryBackend`] keeps a sandboxed tree entirely in memory.
//!
//! Both implement [`relayfs_core::FileSystemBackend`] and can be freely
//! mixed as source and destination of a cross-backend copy or move.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
