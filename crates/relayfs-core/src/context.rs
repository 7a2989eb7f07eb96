//! Per-call operation context.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::{FileError, FileResult};

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier attached to an operation for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl OperationId {
    /// Allocate a fresh process-wide id.
    pub fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// State shared between the caller and the backend for one operation.
///
/// Backends consult [`OperationContext::ensure_writable`] before mutating
/// anything and report written bytes through
/// [`OperationContext::record_written`].
#[derive(Debug)]
pub struct OperationContext {
    id: OperationId,
    read_only: bool,
    bytes_written: AtomicU64,
}

impl OperationContext {
    /// Create a writable context.
    pub fn new() -> Self {
        Self {
            id: OperationId::next(),
            read_only: false,
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Create a context that rejects every mutation with `AccessDenied`.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::new()
        }
    }

    /// The operation id.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Whether mutations are forbidden.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Fail with `AccessDenied` if this context is read-only.
    pub fn ensure_writable(&self) -> FileResult<()> {
        if self.read_only {
            Err(FileError::AccessDenied)
        } else {
            Ok(())
        }
    }

    /// Add to the written byte counter.
    pub fn record_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes written under this context so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
