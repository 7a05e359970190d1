//! Error types for DIMSE operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DimseError>;

/// Standard DIMSE status codes this engine maps errors onto. Not exhaustive
/// of the DICOM standard — only the codes this proxy actually emits.
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const PENDING: u16 = 0xFF00;
    pub const PENDING_WARNING: u16 = 0xFF01;
    pub const FAILURE_UNABLE_TO_PROCESS: u16 = 0xC000;
    pub const FAILURE_PROTOCOL_ERROR: u16 = 0xA900;
}

#[derive(Error, Debug)]
pub enum DimseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("DICOM object error: {0}")]
    DicomObject(String),

    #[error("DICOM upper layer error: {0}")]
    DicomUl(String),

    #[error("association rejected: {0}")]
    AssociationRejected(String),

    #[error("DIMSE operation failed: {0}")]
    OperationFailed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unknown move destination AE title: {0}")]
    UnknownMoveDestination(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),
}

impl DimseError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::OperationFailed(msg.into())
    }

    /// The DIMSE status code a handler should report to the client when
    /// this error prevents completing the operation. Mirrors the error
    /// kinds enumerated for the proxy's error handling design: association
    /// failures and generic operation failures become `0xC000`; protocol
    /// violations (missing QueryRetrieveLevel, unknown MoveDestination)
    /// become `0xA900`.
    pub fn status_code(&self) -> u16 {
        match self {
            DimseError::ProtocolViolation(_) | DimseError::UnknownMoveDestination(_) => {
                status::FAILURE_PROTOCOL_ERROR
            }
            _ => status::FAILURE_UNABLE_TO_PROCESS,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DimseError::Network(_) | DimseError::Timeout(_) | DimseError::AssociationRejected(_)
        )
    }
}
