// THEORY:
// The `collaborators` module holds the engine's seams to the outside world. The
// engine does not know where frames come from, how alerts reach a person or where
// screenshots end up.
//
// Key architectural principles:
// 1.  **Three traits**: `FrameSource`, `AlertSink` and `ScreenshotStore` are the
//     only ways the engine touches devices or disk.
// 2.  **Object-safe async**: Every call returns a `BoxFuture`, so collaborators
//     can be swapped at runtime behind an `Arc<dyn ...>`.
// 3.  **Assume slowness**: Any call may hang. The scheduler wraps each one in a
//     timeout and never holds its state lock across them.

use futures::future::BoxFuture;

use crate::actions::AlertPayload;
use crate::core_modules::frame::Frame;
use crate::core_modules::percent::Percent;
use crate::error::Result;

/// Outcome of one alert delivery attempt.
pub type DeliveryResult = Result<()>;

/// Produces frames on request (camera, file, simulator).
pub trait FrameSource: Send + Sync {
    /// Acquires one decoded frame, or fails with `CaptureFailed`.
    /// Each call is independent; a failed capture can simply be retried.
    fn capture(&self) -> BoxFuture<'_, Result<Frame>>;
}

/// Delivers alerts (push notification, sound, haptics).
pub trait AlertSink: Send + Sync {
    /// Attempts delivery. Failures are logged by the caller and never retried.
    fn deliver(&self, payload: AlertPayload) -> BoxFuture<'_, DeliveryResult>;
}

/// Persists the frame that triggered an alert.
///
/// The reference is handed out before the frame is written so the event can
/// carry it from the moment it is appended to the ledger.
pub trait ScreenshotStore: Send + Sync {
    /// The opaque reference under which the screenshot for `event_id` will be saved.
    fn reference_for(&self, event_id: &str) -> String;

    /// Writes `frame` under `reference`.
    fn save<'a>(
        &'a self,
        reference: &'a str,
        frame: Frame,
        quality: Percent,
    ) -> BoxFuture<'a, Result<()>>;
}
