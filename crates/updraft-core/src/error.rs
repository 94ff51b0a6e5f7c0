//! Error types for the upload core.

use http::StatusCode;
use thiserror::Error;
use updraft_field::FieldError;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Why an upload was terminated. Carried in the record and in body-stream
/// errors so both sides can tell cancellation from failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// Client issued DELETE against the upload.
    Cancelled,
    /// The downstream handler returned before the upload completed.
    HandlerFinished,
    /// The idle policy reaped the record.
    Evicted,
    /// A fresh creation replaced the record under the replace policy.
    Replaced,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateReason::Cancelled => "cancelled",
            TerminateReason::HandlerFinished => "handler finished",
            TerminateReason::Evicted => "evicted",
            TerminateReason::Replaced => "replaced",
        }
    }
}

/// Errors that can occur while admitting a request against an upload.
///
/// Each variant maps to exactly one HTTP status via [`status()`], so the
/// protocol layer never invents codes ad hoc.
///
/// [`status()`]: ProtocolError::status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    MalformedField(#[from] FieldError),

    #[error("append requires an Upload-Offset header")]
    MissingOffset,

    #[error("creation must start at offset 0, request sent {requested}")]
    CreationOffset { requested: u64 },

    #[error("no upload with this token")]
    UnknownUpload,

    #[error("upload token already in use")]
    TokenInUse,

    #[error("another request is already appending to this upload")]
    ProducerConflict,

    #[error("offset mismatch: upload is at {expected}, request sent {requested}")]
    OffsetMismatch { expected: u64, requested: u64 },

    #[error("length mismatch: upload declared {expected}, request sent {declared}")]
    LengthMismatch { expected: u64, declared: u64 },

    #[error("body exceeds the declared Upload-Length of {declared}")]
    LengthExceeded { declared: u64 },

    #[error("interop version mismatch: upload opened with {expected:?}, request sent {requested:?}")]
    InteropMismatch {
        expected: Option<u64>,
        requested: Option<u64>,
    },

    #[error("upload is complete and accepts no further bytes")]
    AlreadyComplete,

    #[error("upload is gone ({reason})", reason = .0.as_str())]
    Terminated(TerminateReason),

    #[error("no bytes received within the transfer timeout")]
    TransferTimeout,
}

impl ProtocolError {
    /// The HTTP status this error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::MalformedField(_)
            | ProtocolError::MissingOffset
            | ProtocolError::CreationOffset { .. }
            | ProtocolError::LengthMismatch { .. }
            | ProtocolError::LengthExceeded { .. }
            | ProtocolError::AlreadyComplete => StatusCode::BAD_REQUEST,
            ProtocolError::UnknownUpload => StatusCode::NOT_FOUND,
            ProtocolError::TokenInUse
            | ProtocolError::ProducerConflict
            | ProtocolError::OffsetMismatch { .. } => StatusCode::CONFLICT,
            ProtocolError::InteropMismatch { .. } => StatusCode::PRECONDITION_FAILED,
            ProtocolError::Terminated(_) => StatusCode::GONE,
            ProtocolError::TransferTimeout => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

/// Error yielded by the downstream body stream when an upload is torn down
/// mid-read. A paused upload (producer went away, more appends expected) is
/// not an error — the stream simply pends.
#[derive(Debug, Clone, Error)]
#[error("upload terminated: {reason}", reason = .reason.as_str())]
pub struct BodyError {
    reason: TerminateReason,
}

impl BodyError {
    pub(crate) fn new(reason: TerminateReason) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> TerminateReason {
        self.reason
    }
}
