use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors: the run refuses to start (or aborts before scanning).
/// Everything past the pre-scan checks is absorbed into counters instead.
#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("root path {root} is inside protected system path {denied}")]
    DenyListViolation { root: PathBuf, denied: &'static str },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("root path does not exist: {0}")]
    RootNotFound(PathBuf),
}

/// Policy class for a per-entity I/O failure.
///
/// `Raced` means the target vanished between observation and operation
/// (another purger or writer got there first) and is absorbed silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorClass {
    Raced,
    Denied,
    Other,
}

pub fn classify_io_error(err: &io::Error) -> IoErrorClass {
    match err.kind() {
        io::ErrorKind::NotFound => IoErrorClass::Raced,
        io::ErrorKind::PermissionDenied => IoErrorClass::Denied,
        _ => IoErrorClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found_as_race() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(classify_io_error(&err), IoErrorClass::Raced);
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(classify_io_error(&err), IoErrorClass::Denied);
    }

    #[test]
    fn test_classify_everything_else_as_other() {
        for kind in [
            io::ErrorKind::TimedOut,
            io::ErrorKind::Interrupted,
            io::ErrorKind::InvalidData,
        ] {
            let err = io::Error::new(kind, "boom");
            assert_eq!(classify_io_error(&err), IoErrorClass::Other);
        }
    }
}
