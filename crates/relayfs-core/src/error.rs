//! Error taxonomy for file operations.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type returned by every backend call and delivered to callbacks.
pub type FileResult<T> = Result<T, FileError>;

/// Platform-style file error.
///
/// Success is expressed as `Ok(_)`, so there is no "OK" variant. Each
/// variant carries a stable negative code (see [`FileError::code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum FileError {
    /// Generic backend failure.
    #[error("Operation failed")]
    Failed,

    /// The file is in use by another operation.
    #[error("File is in use")]
    InUse,

    /// The target already exists.
    #[error("File already exists")]
    Exists,

    /// The path does not exist.
    #[error("File not found")]
    NotFound,

    /// Permission denied by the backend.
    #[error("Access denied")]
    AccessDenied,

    /// Too many open handles.
    #[error("Too many open files")]
    TooManyOpened,

    /// Out of memory.
    #[error("Out of memory")]
    NoMemory,

    /// The destination is out of space.
    #[error("No space left")]
    NoSpace,

    /// A directory was expected.
    #[error("Not a directory")]
    NotADirectory,

    /// The requested operation is not valid for the given paths.
    #[error("Invalid operation")]
    InvalidOperation,

    /// Security policy violation.
    #[error("Security error")]
    Security,

    /// The operation was aborted before completing.
    #[error("Operation aborted")]
    Abort,

    /// A regular file was expected.
    #[error("Not a file")]
    NotAFile,

    /// The directory is not empty.
    #[error("Directory not empty")]
    NotEmpty,

    /// The path or URL could not be parsed.
    #[error("Invalid URL")]
    InvalidUrl,
}

impl FileError {
    /// Stable numeric code for this error.
    pub fn code(self) -> i32 {
        match self {
            Self::Failed => -1,
            Self::InUse => -2,
            Self::Exists => -3,
            Self::NotFound => -4,
            Self::AccessDenied => -5,
            Self::TooManyOpened => -6,
            Self::NoMemory => -7,
            Self::NoSpace => -8,
            Self::NotADirectory => -9,
            Self::InvalidOperation => -10,
            Self::Security => -11,
            Self::Abort => -12,
            Self::NotAFile => -13,
            Self::NotEmpty => -14,
            Self::InvalidUrl => -15,
        }
    }

    /// Look up an error by its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            -1 => Self::Failed,
            -2 => Self::InUse,
            -3 => Self::Exists,
            -4 => Self::NotFound,
            -5 => Self::AccessDenied,
            -6 => Self::TooManyOpened,
            -7 => Self::NoMemory,
            -8 => Self::NoSpace,
            -9 => Self::NotADirectory,
            -10 => Self::InvalidOperation,
            -11 => Self::Security,
            -12 => Self::Abort,
            -13 => Self::NotAFile,
            -14 => Self::NotEmpty,
            -15 => Self::InvalidUrl,
            _ => return None,
        };
        Some(err)
    }

    /// Convert an I/O error into the closest file error.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::AccessDenied,
            io::ErrorKind::AlreadyExists => Self::Exists,
            io::ErrorKind::NotADirectory => Self::NotADirectory,
            io::ErrorKind::IsADirectory => Self::NotAFile,
            io::ErrorKind::DirectoryNotEmpty => Self::NotEmpty,
            io::ErrorKind::StorageFull => Self::NoSpace,
            io::ErrorKind::OutOfMemory => Self::NoMemory,
            io::ErrorKind::InvalidInput => Self::InvalidOperation,
            io::ErrorKind::Interrupted => Self::Abort,
            _ => Self::Failed,
        }
    }
}

impl From<io::Error> for FileError {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io() {
        let err = FileError::from_io(&io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(err, FileError::AccessDenied);

        let err: FileError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err, FileError::NotFound);

        let err = FileError::from_io(&io::Error::other("boom"));
        assert_eq!(err, FileError::Failed);
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(FileError::NotFound.code(), -4);
        assert_eq!(FileError::NoSpace.code(), -8);
        for code in -15..=-1 {
            let err = FileError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert_eq!(FileError::from_code(0), None);
        assert_eq!(FileError::from_code(-16), None);
    }
}
