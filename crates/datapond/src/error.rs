// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for datapond operations.
//!
//! Every operation returns a result code plus an optional value or handle; no
//! panics cross the facade boundary. Local pond errors are synchronous, remote
//! errors surface after the round trip completes (or after the deadline, as
//! [`Error::Timeout`]).

use std::io;

/// Errors returned by datapond operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Store Errors
    // ========================================================================
    /// The named element does not exist in the resolved pond.
    NotFound,
    /// The name is already bound in the target pond, or the listener handle
    /// is already registered.
    AlreadyExists,
    /// Remover identity differs from the recorded creator identity.
    NotAuthorized,
    /// A required field is absent or malformed (e.g. an empty element name).
    InvalidArgument(&'static str),
    /// The operation is invalid for the current role or state.
    Unsupported,

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// The remote round trip exceeded its deadline.
    Timeout,
    /// No route to the target exists (peer unknown or disconnected).
    TransportUnavailable,

    // ========================================================================
    // Plumbing Errors
    // ========================================================================
    /// Malformed frame or record on the wire.
    Protocol(String),
    /// I/O error from the underlying transport.
    Io(io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "Element not found"),
            Error::AlreadyExists => write!(f, "Name or handle already exists"),
            Error::NotAuthorized => write!(f, "Remover is not the recorded creator"),
            Error::InvalidArgument(what) => write!(f, "Invalid argument: {}", what),
            Error::Unsupported => write!(f, "Operation unsupported for current role"),
            Error::Timeout => write!(f, "Remote call timed out"),
            Error::TransportUnavailable => write!(f, "No route to target"),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
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
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the public [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

/// Result code carried in a Reply frame.
///
/// `Timeout` and `TransportUnavailable` are caller-local conditions and are
/// never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    /// Operation succeeded.
    Ok = 0,
    /// Element (or listener handle) not found.
    NotFound = 1,
    /// Name or listener handle already bound.
    AlreadyExists = 2,
    /// Remover is not the recorded creator.
    NotAuthorized = 3,
    /// Required field absent or malformed.
    InvalidArgument = 4,
    /// Action unknown to the serving side.
    Unsupported = 5,
}

impl ResultCode {
    /// Decode a wire byte into a result code.
    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ResultCode::Ok),
            1 => Ok(ResultCode::NotFound),
            2 => Ok(ResultCode::AlreadyExists),
            3 => Ok(ResultCode::NotAuthorized),
            4 => Ok(ResultCode::InvalidArgument),
            5 => Ok(ResultCode::Unsupported),
            other => Err(Error::Protocol(format!("unknown result code {}", other))),
        }
    }

    /// Turn a successful code into `Ok(())` and a failure code into the
    /// matching [`Error`].
    pub fn into_result(self) -> Result<()> {
        match self {
            ResultCode::Ok => Ok(()),
            ResultCode::NotFound => Err(Error::NotFound),
            ResultCode::AlreadyExists => Err(Error::AlreadyExists),
            ResultCode::NotAuthorized => Err(Error::NotAuthorized),
            ResultCode::InvalidArgument => Err(Error::InvalidArgument("rejected by server")),
            ResultCode::Unsupported => Err(Error::Unsupported),
        }
    }
}

impl From<&Error> for ResultCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotFound => ResultCode::NotFound,
            Error::AlreadyExists => ResultCode::AlreadyExists,
            Error::NotAuthorized => ResultCode::NotAuthorized,
            Error::InvalidArgument(_) => ResultCode::InvalidArgument,
            // Everything else degrades to Unsupported on the wire; the
            // caller-local kinds never reach a reply path.
            _ => ResultCode::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_roundtrip() {
        for code in [
            ResultCode::Ok,
            ResultCode::NotFound,
            ResultCode::AlreadyExists,
            ResultCode::NotAuthorized,
            ResultCode::InvalidArgument,
            ResultCode::Unsupported,
        ] {
            let decoded = ResultCode::from_wire(code as u8).unwrap();
            assert_eq!(decoded, code);
        }
    }

    #[test]
    fn test_unknown_result_code() {
        assert!(matches!(
            ResultCode::from_wire(200),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_into_result_maps_failures() {
        assert!(ResultCode::Ok.into_result().is_ok());
        assert!(matches!(
            ResultCode::NotFound.into_result(),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            ResultCode::NotAuthorized.into_result(),
            Err(Error::NotAuthorized)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidArgument("element name is empty");
        assert!(err.to_string().contains("element name is empty"));

        let err = Error::Protocol("truncated record".into());
        assert!(err.to_string().contains("truncated record"));
    }
}
