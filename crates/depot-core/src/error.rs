//! Error types for the Depot protocol

use thiserror::Error;

/// Protocol-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("malformed {command} frame: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("invalid size field: {0:?}")]
    InvalidSize(String),

    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// Structured error codes sent after `ERROR:` on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    InvalidName,
    IsDirectory,
    PermissionDenied,
    Busy,
    Io,
}

impl ErrorCode {
    /// Wire token for this code
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidName => "INVALID_NAME",
            ErrorCode::IsDirectory => "IS_DIRECTORY",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Busy => "BUSY",
            ErrorCode::Io => "IO",
        }
    }

    /// Parse a wire token back into a code
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "NOT_FOUND" => ErrorCode::NotFound,
            "INVALID_NAME" => ErrorCode::InvalidName,
            "IS_DIRECTORY" => ErrorCode::IsDirectory,
            "PERMISSION_DENIED" => ErrorCode::PermissionDenied,
            "BUSY" => ErrorCode::Busy,
            "IO" => ErrorCode::Io,
            _ => return None,
        })
    }

    /// Classify an I/O error from a filesystem mutation
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => return ErrorCode::NotFound,
            ErrorKind::PermissionDenied => return ErrorCode::PermissionDenied,
            _ => {}
        }

        match err.raw_os_error() {
            Some(code) if code == libc::EBUSY || code == libc::ETXTBSY => ErrorCode::Busy,
            _ => ErrorCode::Io,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ProtocolError> for ErrorCode {
    fn from(e: &ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidName(_) => ErrorCode::InvalidName,
            _ => ErrorCode::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_code_tokens_parse_back() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::InvalidName,
            ErrorCode::IsDirectory,
            ErrorCode::PermissionDenied,
            ErrorCode::Busy,
            ErrorCode::Io,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("nope"), None);
    }

    #[test]
    fn test_from_io() {
        let e = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(ErrorCode::from_io(&e), ErrorCode::NotFound);

        let e = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(ErrorCode::from_io(&e), ErrorCode::PermissionDenied);

        let e = io::Error::from_raw_os_error(libc::EBUSY);
        assert_eq!(ErrorCode::from_io(&e), ErrorCode::Busy);

        let e = io::Error::new(io::ErrorKind::Other, "disk on fire");
        assert_eq!(ErrorCode::from_io(&e), ErrorCode::Io);
    }
}
