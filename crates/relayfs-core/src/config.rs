//! Relay configuration types.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default copy buffer size (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for the worker pool and cross-backend transfers.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RelayConfig {
    /// Number of worker threads (0 = one per CPU).
    #[builder(default = "0")]
    #[serde(default)]
    pub worker_threads: usize,

    /// Maximum number of queued tasks before submission is refused.
    #[builder(default = "256")]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Name prefix for worker threads.
    #[builder(default = "default_thread_name()")]
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Chunk size used when streaming between backends.
    #[builder(default = "DEFAULT_BUFFER_SIZE")]
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Copy source timestamps onto transferred files.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    256
}

fn default_thread_name() -> String {
    "relayfs-worker".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl RelayConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.buffer_size == Some(0) {
            return Err("Buffer size must be greater than zero".to_string());
        }
        if self.queue_capacity == Some(0) {
            return Err("Queue capacity must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl RelayConfig {
    /// Create a new config builder.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Options for cross-backend copy and move.
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            buffer_size: self.buffer_size.max(1),
            preserve_timestamps: self.preserve_timestamps,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            queue_capacity: default_queue_capacity(),
            thread_name: default_thread_name(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            preserve_timestamps: true,
        }
    }
}

/// Options for streaming a copy or move between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Chunk size for each read/write round trip.
    pub buffer_size: usize,
    /// Copy access and modification times onto the destination.
    pub preserve_timestamps: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            preserve_timestamps: true,
        }
    }
}
