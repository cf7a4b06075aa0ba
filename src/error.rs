//! Error types for the EMU container.

use std::fmt;
use std::io;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for EMU container operations.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred on the underlying byte stream.
    Io(io::Error),

    /// The file could not be created or opened: creation failure,
    /// magic/version mismatch, or a footer pointer out of range.
    OpenFailed(String),

    /// The operation is not supported by the container in its current
    /// mode (update-open, reading a write-open container, misaligned
    /// raster writes, ...).
    Unsupported(String),

    /// A tile read found no entry in the tile index.
    IndexMissing {
        /// Overview level of the missing tile (0 = full resolution).
        level: u64,
        /// Band number of the missing tile.
        band: u64,
        /// Tile column.
        x: u64,
        /// Tile row.
        y: u64,
    },

    /// An attribute-table column was accessed with an incompatible
    /// buffer type, or a block buffer had the wrong size.
    TypeMismatch(String),

    /// A zlib-level failure or an unknown compression discriminant.
    Codec(String),

    /// A structural invariant was violated: overviews created twice,
    /// a tile key written twice, or overlapping attribute chunks.
    InvariantViolated(String),

    /// The progress callback requested cancellation of a copy.
    Cancelled,
}

impl Error {
    /// Creates a new open-failure error.
    pub fn open_failed(msg: impl Into<String>) -> Self {
        Error::OpenFailed(msg.into())
    }

    /// Creates a new unsupported-operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Creates a new type-mismatch error.
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Error::TypeMismatch(msg.into())
    }

    /// Creates a new codec error.
    pub fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }

    /// Creates a new invariant-violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolated(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::OpenFailed(msg) => write!(f, "Open failed: {}", msg),
            Error::Unsupported(msg) => write!(f, "Not supported: {}", msg),
            Error::IndexMissing { level, band, x, y } => {
                write!(
                    f,
                    "Tile index missing entry for level {} band {} tile ({}, {})",
                    level, band, x, y
                )
            }
            Error::TypeMismatch(msg) => write!(f, "Type mismatch: {}", msg),
            Error::Codec(msg) => write!(f, "Codec failure: {}", msg),
            Error::InvariantViolated(msg) => write!(f, "Invariant violated: {}", msg),
            Error::Cancelled => write!(f, "Operation cancelled by progress callback"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::open_failed("bad magic");
        assert_eq!(err.to_string(), "Open failed: bad magic");

        let err = Error::IndexMissing { level: 1, band: 2, x: 3, y: 4 };
        assert!(err.to_string().contains("level 1"));
        assert!(err.to_string().contains("(3, 4)"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_source() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "inner").into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&Error::Cancelled).is_none());
    }
}
