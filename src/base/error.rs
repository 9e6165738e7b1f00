use std::error;
use std::fmt;
use std::io;

use crate::answers::SystemLastError;
use crate::types::{ErrorCode, UnitId};

/// Represents errors that can occur during M12 operations.
#[derive(Debug)]
pub enum Error {
    /// The execution of operation failed. Contains a description of the failure.
    OperationFail { description: String },

    /// No response frame arrived before the read timeout elapsed.
    OperationTimeout,

    /// The pending read was aborted through a `CancellationToken`.
    OperationCancelled,

    /// The decoding data is invalid according to current protocol. Contains a description of the protocol error.
    ProtocolError { description: String },

    /// A structurally complete frame arrived but its CRC32 did not match.
    ChecksumMismatch { received: u32, calculated: u32 },

    /// The buffer provided is too small for message encoding.
    BufferTooSmall,

    /// An argument is out of its domain. Raised before anything is sent.
    InvalidArgument { description: String },

    /// A unit stayed busy at the same position for longer than the wait timeout.
    /// A stop command has been sent to the unit.
    MotionTimeout { unit: UnitId },

    /// A unit finished its motion with an error code.
    UnitError { unit: UnitId, error: ErrorCode },

    /// The controller finished a coordinated operation with an error.
    SystemError(SystemLastError),

    /// The number of reconstructed points differs from the number of captured samples.
    SamplingPointMissing { expected: usize, actual: usize },

    /// An I/O error occurred while communicating with the underlying stream (e.g., serial port).
    IoError(io::Error),
}

impl Error {
    /// Returns `true` for transport level failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::IoError(_)
                | Error::OperationTimeout
                | Error::ChecksumMismatch { .. }
                | Error::ProtocolError { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OperationFail { description } => write!(f, "operation failed: {}", description),
            Error::OperationTimeout => write!(f, "operation timeout"),
            Error::OperationCancelled => write!(f, "operation cancelled"),
            Error::ProtocolError { description } => write!(f, "protocol error: {}", description),
            Error::ChecksumMismatch {
                received,
                calculated,
            } => write!(
                f,
                "checksum mismatch: received {:08X}, calculated {:08X}",
                received, calculated
            ),
            Error::BufferTooSmall => write!(f, "buffer is too small for message encoding"),
            Error::InvalidArgument { description } => {
                write!(f, "invalid argument: {}", description)
            }
            Error::MotionTimeout { unit } => {
                write!(f, "timeout waiting for {} to finish its motion", unit)
            }
            Error::UnitError { unit, error } => write!(f, "{} reported: {}", unit, error),
            Error::SystemError(last) => {
                write!(f, "system error on {}: {}", last.unit, last.error)
            }
            Error::SamplingPointMissing { expected, actual } => write!(
                f,
                "sampling points missing: expected {}, got {}",
                expected, actual
            ),
            Error::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::IoError(err.into())
    }
}

/// A specialized `Result` type for M12 operations.
pub type Result<T> = std::result::Result<T, Error>;
