// THEORY:
// The `error` module is the engine's single error taxonomy, `SentinelError`.
//
// Key architectural principles:
// 1.  **Nothing is process-fatal**: Capture failures are transient and retried on
//     the next tick. Dimension mismatches yield "no verdict" for one tick.
//     Delivery failures are only logged.
// 2.  **Operator transitions report synchronously**: `start` and
//     `reset_reference` return their failures to the caller, leaving state as it
//     was before the call.

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::MonitorStatus;

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// The capture collaborator returned no frame.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The capture collaborator did not answer in time. Handled exactly like
    /// `CaptureFailed`.
    #[error("capture timed out after {0:?}")]
    CaptureTimedOut(Duration),

    /// The two frames of a comparison have different dimensions.
    #[error(
        "frame dimensions differ: reference is {}x{}, current is {}x{}",
        reference.0, reference.1, current.0, current.1
    )]
    DimensionMismatch {
        reference: (u32, u32),
        current: (u32, u32),
    },

    /// The alert collaborator failed to deliver a payload.
    #[error("alert delivery failed: {0}")]
    DeliveryFailed(String),

    /// A region was rejected on creation.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// A pixel buffer does not match its declared dimensions.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// An operator transition was requested from a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: MonitorStatus,
    },

    /// Reading or writing persisted settings failed.
    #[error("settings error: {0}")]
    Settings(String),

    /// Exported ledger text could not be parsed back.
    #[error("export parse error: {0}")]
    Export(String),

    /// Decoding or encoding an image failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl SentinelError {
    /// Whether this error is a capture failure (including a timeout).
    pub fn is_capture_failure(&self) -> bool {
        matches!(self, Self::CaptureFailed(_) | Self::CaptureTimedOut(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SentinelError>;
