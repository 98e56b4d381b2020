// THEORY:
// The `MonitoringScheduler` is the top-level API of the engine. It owns the
// monitoring state machine and drives the capture -> compare -> decide -> alert
// cycle on a fixed interval.
//
//     Idle --start()--> Active --stop()--> Idle
//                        |  ^
//                        +--+ tick / reset_reference()
//
// Key architectural principles:
// 1.  **One lock, short critical sections**: Session state and the ledger sit
//     behind a single async mutex. Every mutation (applying a tick, replacing the
//     reference, stopping) happens inside one critical section with no await in
//     it, so no caller ever observes a half-applied tick.
// 2.  **Slow I/O outside the lock**: Captures, screenshot writes and alert
//     deliveries run outside the lock, each under a timeout. `stop()` is never
//     stuck behind a camera that does not answer.
// 3.  **Epochs instead of snapshots**: Every start and stop bumps the session
//     epoch. A capture that completes after the session it belonged to has ended
//     is dropped on the floor. The reference frame is read from live session
//     state on every tick, so `reset_reference()` is always honoured.
// 4.  **Debounce until acknowledged**: After an alert fires, the `alert_pending`
//     latch suppresses further alerts (and ledger appends) until the caller
//     resets the reference. Time alone never clears it.
// 5.  **Sequential ticks**: At most one cycle is in flight per scheduler. Ticker
//     cycles and `tick_now()` calls queue on a cycle guard held from capture to
//     dispatch, so a slow cycle delays the next one instead of overlapping it and
//     `last_frame` never moves back to an older capture.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, trace, warn};

use crate::actions::{ActionConfig, AlertPayload};
use crate::collaborators::{AlertSink, FrameSource, ScreenshotStore};
use crate::core_modules::comparator::{ChangeMetrics, FrameComparator};
use crate::core_modules::frame::Frame;
use crate::core_modules::ledger::{DetectionEvent, DetectionLedger, ExportFormat};
use crate::core_modules::percent::Percent;
use crate::core_modules::policy::{DetectionPolicy, Firing, Verdict};
use crate::core_modules::region::RegionMask;
use crate::error::{Result, SentinelError};
use crate::settings::{MonitorSettings, SettingsHandle};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Whether a monitoring session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorStatus {
    #[default]
    Idle,
    Active,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Idle => f.write_str("idle"),
            MonitorStatus::Active => f.write_str("active"),
        }
    }
}

/// Timing configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between two capture/compare cycles.
    pub tick_interval: Duration,
    /// How long a capture may take before it counts as failed.
    pub capture_timeout: Duration,
    /// How long an alert delivery or screenshot write may take.
    pub delivery_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(2000),
            capture_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tick interval. Intervals below one millisecond are raised to it.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

/// What one capture/compare cycle amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No session was running (or it ended while the frame was being captured).
    Inactive,
    /// The capture failed or timed out; the tick was skipped.
    CaptureFailed(String),
    /// The frame pair could not be compared (dimension mismatch).
    NoVerdict(String),
    /// The frames were compared and no criterion fired.
    NoChange(ChangeMetrics),
    /// A change was detected but an alert is already pending.
    Suppressed(Verdict),
    /// A change was detected, recorded and alerted.
    Alerted(DetectionEvent),
}

/// Notifications broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Started { reference_captured_at: DateTime<Utc> },
    Cycle(CycleOutcome),
    ReferenceReset { reference_captured_at: DateTime<Utc> },
    Stopped,
}

#[derive(Debug, Default)]
struct Session {
    status: MonitorStatus,
    reference_frame: Option<Frame>,
    last_frame: Option<Frame>,
    last_alert_at: Option<DateTime<Utc>>,
    alert_pending: bool,
    epoch: u64,
}

impl Session {
    fn begin(&mut self, reference: Frame) {
        self.epoch += 1;
        self.status = MonitorStatus::Active;
        self.last_frame = Some(reference.clone());
        self.reference_frame = Some(reference);
        self.alert_pending = false;
    }

    fn end(&mut self) {
        self.epoch += 1;
        self.status = MonitorStatus::Idle;
        self.reference_frame = None;
        self.last_frame = None;
        self.alert_pending = false;
    }
}

/// Handle to the background tick task.
struct Ticker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(shared: Weak<Shared>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(tick_loop(shared, period, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    fn cancel(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

async fn tick_loop(shared: Weak<Shared>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(tick_interval_ms = period.as_millis(), "ticker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.run_cycle().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("ticker stopped");
}

struct EngineState {
    session: Session,
    ledger: DetectionLedger,
    ticker: Option<Ticker>,
}

/// Side effects of an alert, performed after the state lock is released.
struct Dispatch {
    payload: AlertPayload,
    screenshot: Option<(String, Frame, Percent)>,
}

struct Shared {
    config: MonitorConfig,
    settings: SettingsHandle,
    source: Arc<dyn FrameSource>,
    alerts: Arc<dyn AlertSink>,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
    comparator: FrameComparator,
    state: Mutex<EngineState>,
    /// Held for the whole of a cycle. Never taken by `stop`.
    cycle: Mutex<()>,
    events: broadcast::Sender<MonitorEvent>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(ticker) = self.state.get_mut().ticker.take() {
            ticker.cancel();
        }
    }
}

impl Shared {
    /// Captures a frame under the capture timeout. Every failure is reported as a
    /// capture failure.
    async fn capture(&self) -> Result<Frame> {
        match timeout(self.config.capture_timeout, self.source.capture()).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) if e.is_capture_failure() => Err(e),
            Ok(Err(e)) => Err(SentinelError::CaptureFailed(e.to_string())),
            Err(_) => Err(SentinelError::CaptureTimedOut(self.config.capture_timeout)),
        }
    }

    /// Checks the session status and returns the current epoch.
    async fn ensure_status(&self, operation: &'static str, required: MonitorStatus) -> Result<u64> {
        let state = self.state.lock().await;
        if state.session.status != required {
            return Err(SentinelError::InvalidState {
                operation,
                state: state.session.status,
            });
        }
        Ok(state.session.epoch)
    }

    fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn finish(&self, outcome: CycleOutcome) -> CycleOutcome {
        self.publish(MonitorEvent::Cycle(outcome.clone()));
        outcome
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let _cycle = self.cycle.lock().await;

        let epoch = {
            let state = self.state.lock().await;
            if state.session.status != MonitorStatus::Active {
                return CycleOutcome::Inactive;
            }
            state.session.epoch
        };

        let frame = match self.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "capture failed, skipping tick");
                return self.finish(CycleOutcome::CaptureFailed(e.to_string()));
            }
        };

        let settings: MonitorSettings = self.settings.read().await.clone();
        let mask = settings.regions.mask();

        let (outcome, dispatch) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.session.status != MonitorStatus::Active || state.session.epoch != epoch {
                debug!("session ended during capture, discarding frame");
                return CycleOutcome::Inactive;
            }

            state.session.last_frame = Some(frame.clone());
            let Some(reference) = state.session.reference_frame.clone() else {
                return CycleOutcome::Inactive;
            };

            let metrics = match self.comparator.compare(
                &reference,
                &frame,
                &mask,
                settings.detection.pixel_sensitivity,
            ) {
                Ok(metrics) => metrics,
                Err(e) => {
                    warn!(error = %e, "frame pair cannot be compared, no verdict this tick");
                    return self.finish(CycleOutcome::NoVerdict(e.to_string()));
                }
            };

            let verdict = DetectionPolicy::evaluate(&metrics, &settings.detection);
            debug!(
                pixel_ratio = metrics.pixel_ratio,
                color_block_ratio = metrics.color_block_ratio,
                text_confidence = metrics.text_confidence,
                considered_pixels = metrics.considered_pixels,
                positive = verdict.is_positive(),
                "frame compared"
            );

            match verdict.primary().copied() {
                None => (CycleOutcome::NoChange(metrics), None),
                Some(_) if state.session.alert_pending => {
                    debug!("change persists, alert already pending");
                    (CycleOutcome::Suppressed(verdict), None)
                }
                Some(primary) => {
                    let event = self.compose_event(&verdict, &primary, &mask, &settings.actions);
                    state.ledger.append(event.clone());
                    state.session.alert_pending = true;
                    state.session.last_alert_at = Some(event.timestamp);

                    info!(
                        event_id = %event.id,
                        criterion = %event.criterion,
                        confidence = event.confidence,
                        region = event.region.as_deref().unwrap_or("whole frame"),
                        "scene change detected"
                    );

                    let payload = AlertPayload::compose(&settings.actions, &verdict, &event);
                    let screenshot = event
                        .screenshot_ref
                        .clone()
                        .map(|reference| (reference, frame.clone(), settings.actions.screenshot.quality));
                    (
                        CycleOutcome::Alerted(event),
                        Some(Dispatch {
                            payload,
                            screenshot,
                        }),
                    )
                }
            }
        };

        if let Some(dispatch) = dispatch {
            self.dispatch(dispatch).await;
        }
        self.finish(outcome)
    }

    fn compose_event(
        &self,
        verdict: &Verdict,
        primary: &Firing,
        mask: &RegionMask,
        actions: &ActionConfig,
    ) -> DetectionEvent {
        let mut description = verdict
            .fired()
            .iter()
            .map(|firing| firing.criterion.describe(firing.metric))
            .collect::<Vec<_>>()
            .join("; ");

        let region_names = mask.region_names();
        let region = (!region_names.is_empty()).then(|| region_names.join(", "));
        if let Some(region) = &region {
            description.push_str(&format!(" in {}", region));
        }

        let confidence = (primary.metric * 10.0).round() / 10.0;
        let mut event = DetectionEvent::new(primary.criterion, confidence, description);
        if let Some(region) = region {
            event = event.with_region(region);
        }
        if actions.screenshot.enabled {
            if let Some(store) = &self.screenshots {
                let reference = store.reference_for(&event.id);
                event = event.with_screenshot_ref(reference);
            }
        }
        event
    }

    async fn dispatch(&self, dispatch: Dispatch) {
        let limit = self.config.delivery_timeout;

        if let (Some((reference, frame, quality)), Some(store)) = (dispatch.screenshot, &self.screenshots) {
            match timeout(limit, store.save(&reference, frame, quality)).await {
                Ok(Ok(())) => debug!(reference = %reference, "screenshot saved"),
                Ok(Err(e)) => warn!(reference = %reference, error = %e, "failed to save screenshot"),
                Err(_) => warn!(reference = %reference, timeout_ms = limit.as_millis(), "screenshot save timed out"),
            }
        }

        if !dispatch.payload.is_deliverable() {
            debug!("no alert actions enabled, skipping delivery");
            return;
        }

        match timeout(limit, self.alerts.deliver(dispatch.payload)).await {
            Ok(Ok(())) => debug!("alert delivered"),
            Ok(Err(e)) => warn!(error = %e, "alert delivery failed"),
            Err(_) => warn!(timeout_ms = limit.as_millis(), "alert delivery timed out"),
        }
    }
}

/// Builder for `MonitoringScheduler`.
pub struct SchedulerBuilder {
    config: MonitorConfig,
    settings: Option<SettingsHandle>,
    source: Arc<dyn FrameSource>,
    alerts: Arc<dyn AlertSink>,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
    comparator: FrameComparator,
    ledger: DetectionLedger,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares caller-owned settings with the scheduler. Without this the scheduler
    /// gets its own default settings, reachable through `settings()`.
    pub fn settings(mut self, settings: SettingsHandle) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn screenshot_store(mut self, store: Arc<dyn ScreenshotStore>) -> Self {
        self.screenshots = Some(store);
        self
    }

    pub fn comparator(mut self, comparator: FrameComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn ledger(mut self, ledger: DetectionLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn build(self) -> MonitoringScheduler {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Shared {
            config: self.config,
            settings: self
                .settings
                .unwrap_or_else(|| MonitorSettings::default().into_handle()),
            source: self.source,
            alerts: self.alerts,
            screenshots: self.screenshots,
            comparator: self.comparator,
            state: Mutex::new(EngineState {
                session: Session::default(),
                ledger: self.ledger,
                ticker: None,
            }),
            cycle: Mutex::new(()),
            events,
        };
        MonitoringScheduler {
            shared: Arc::new(shared),
        }
    }
}

/// Drives periodic capture and comparison for one monitoring session at a time.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct MonitoringScheduler {
    shared: Arc<Shared>,
}

impl MonitoringScheduler {
    pub fn builder(source: Arc<dyn FrameSource>, alerts: Arc<dyn AlertSink>) -> SchedulerBuilder {
        SchedulerBuilder {
            config: MonitorConfig::default(),
            settings: None,
            source,
            alerts,
            screenshots: None,
            comparator: FrameComparator::new(),
            ledger: DetectionLedger::new(),
        }
    }

    /// Captures the reference frame and starts ticking.
    ///
    /// Only valid while idle. If the capture fails the scheduler stays idle and
    /// the capture error is returned. Dropping the returned future before the
    /// capture completes leaves the scheduler idle.
    pub async fn start(&self) -> Result<()> {
        self.shared.ensure_status("start", MonitorStatus::Idle).await?;

        let frame = self
            .shared
            .capture()
            .await
            .inspect_err(|e| warn!(error = %e, "initial capture failed, staying idle"))?;
        let reference_captured_at = frame.captured_at();

        {
            let mut state = self.shared.state.lock().await;
            if state.session.status != MonitorStatus::Idle {
                return Err(SentinelError::InvalidState {
                    operation: "start",
                    state: state.session.status,
                });
            }
            state.session.begin(frame);
            state.ticker = Some(Ticker::spawn(
                Arc::downgrade(&self.shared),
                self.shared.config.tick_interval,
            ));
        }

        info!(
            tick_interval_ms = self.shared.config.tick_interval.as_millis(),
            "monitoring started"
        );
        self.shared.publish(MonitorEvent::Started {
            reference_captured_at,
        });
        Ok(())
    }

    /// Captures a new reference frame and clears the pending-alert latch.
    ///
    /// Only valid while active. On capture failure the previous reference and the
    /// latch are left untouched and the error is returned.
    pub async fn reset_reference(&self) -> Result<()> {
        let epoch = self
            .shared
            .ensure_status("reset reference", MonitorStatus::Active)
            .await?;

        let frame = self
            .shared
            .capture()
            .await
            .inspect_err(|e| warn!(error = %e, "reference capture failed, keeping previous reference"))?;
        let reference_captured_at = frame.captured_at();

        {
            let mut state = self.shared.state.lock().await;
            if state.session.status != MonitorStatus::Active || state.session.epoch != epoch {
                return Err(SentinelError::InvalidState {
                    operation: "reset reference",
                    state: state.session.status,
                });
            }
            state.session.reference_frame = Some(frame);
            state.session.alert_pending = false;
        }

        info!("reference frame reset");
        self.shared.publish(MonitorEvent::ReferenceReset {
            reference_captured_at,
        });
        Ok(())
    }

    /// Stops ticking and forgets the session's frames and latch. A no-op while idle.
    pub async fn stop(&self) {
        let ticker = {
            let mut state = self.shared.state.lock().await;
            if state.session.status == MonitorStatus::Idle {
                trace!("stop requested while idle");
                return;
            }
            state.session.end();
            state.ticker.take()
        };

        if let Some(ticker) = ticker {
            ticker.cancel();
        }

        info!("monitoring stopped");
        self.shared.publish(MonitorEvent::Stopped);
    }

    /// Runs one capture/compare cycle now. Waits for a cycle already in flight
    /// (ticker or another caller) to finish first.
    pub async fn tick_now(&self) -> CycleOutcome {
        self.shared.run_cycle().await
    }

    pub async fn status(&self) -> MonitorStatus {
        self.shared.state.lock().await.session.status
    }

    /// Whether an alert fired and has not been acknowledged by a reference reset.
    pub async fn alert_pending(&self) -> bool {
        self.shared.state.lock().await.session.alert_pending
    }

    pub async fn reference_frame(&self) -> Option<Frame> {
        self.shared.state.lock().await.session.reference_frame.clone()
    }

    pub async fn last_frame(&self) -> Option<Frame> {
        self.shared.state.lock().await.session.last_frame.clone()
    }

    pub async fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        self.shared.state.lock().await.session.last_alert_at
    }

    /// Recorded detection events, oldest first.
    pub async fn history(&self) -> Vec<DetectionEvent> {
        self.shared.state.lock().await.ledger.all()
    }

    pub async fn clear_history(&self) {
        self.shared.state.lock().await.ledger.clear();
        info!("detection history cleared");
    }

    /// Renders the detection history. Writing the bytes anywhere is up to the caller.
    pub async fn export_history(&self, format: ExportFormat) -> Vec<u8> {
        self.shared.state.lock().await.ledger.export(format)
    }

    /// The settings handle this scheduler reads on every tick.
    pub fn settings(&self) -> SettingsHandle {
        Arc::clone(&self.shared.settings)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Subscribes to lifecycle and cycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DeliveryResult;
    use crate::core_modules::pixel::pixel::Pixel;
    use crate::core_modules::policy::Criterion;
    use crate::core_modules::region::Rect;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CALM: Pixel = Pixel::rgb(0, 0, 0);
    const BRIGHT: Pixel = Pixel::rgb(255, 255, 255);

    /// Frames carry their capture time, so scripted frames use a fixed one to
    /// stay comparable.
    fn scene(pixel: Pixel) -> Frame {
        Frame::solid(2, 2, pixel).with_captured_at(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn calm() -> Frame {
        scene(CALM)
    }

    fn bright() -> Frame {
        scene(BRIGHT)
    }

    /// Hands out queued frames; fails once the queue is empty.
    #[derive(Default)]
    struct ScriptedSource {
        frames: std::sync::Mutex<VecDeque<Frame>>,
        delay: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Frame>) -> Arc<Self> {
            Arc::new(Self {
                frames: std::sync::Mutex::new(frames.into()),
                delay: None,
            })
        }

        fn slow(frames: Vec<Frame>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                frames: std::sync::Mutex::new(frames.into()),
                delay: Some(delay),
            })
        }

        fn push(&self, frame: Frame) {
            self.frames.lock().unwrap().push_back(frame);
        }

        fn remaining(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl FrameSource for ScriptedSource {
        fn capture(&self) -> BoxFuture<'_, Result<Frame>> {
            async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.frames
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| SentinelError::CaptureFailed("script exhausted".into()))
            }
            .boxed()
        }
    }

    /// Hands out queued frames, each after its own delay, and records how many
    /// captures were running at once.
    #[derive(Default)]
    struct TimedSource {
        frames: std::sync::Mutex<VecDeque<(Frame, Duration)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        captures: AtomicUsize,
    }

    impl TimedSource {
        fn new(frames: Vec<(Frame, Duration)>) -> Arc<Self> {
            Arc::new(Self {
                frames: std::sync::Mutex::new(frames.into()),
                ..Self::default()
            })
        }
    }

    impl FrameSource for TimedSource {
        fn capture(&self) -> BoxFuture<'_, Result<Frame>> {
            async move {
                let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(running, Ordering::SeqCst);
                self.captures.fetch_add(1, Ordering::SeqCst);

                let next = self.frames.lock().unwrap().pop_front();
                let result = match next {
                    Some((frame, delay)) => {
                        tokio::time::sleep(delay).await;
                        Ok(frame)
                    }
                    None => Err(SentinelError::CaptureFailed("script exhausted".into())),
                };

                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            }
            .boxed()
        }
    }

    struct HangingSource;

    impl FrameSource for HangingSource {
        fn capture(&self) -> BoxFuture<'_, Result<Frame>> {
            futures::future::pending().boxed()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        payloads: std::sync::Mutex<Vec<AlertPayload>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Self::default()
            })
        }

        fn delivered(&self) -> Vec<AlertPayload> {
            self.payloads.lock().unwrap().clone()
        }
    }

    impl AlertSink for RecordingSink {
        fn deliver(&self, payload: AlertPayload) -> BoxFuture<'_, DeliveryResult> {
            async move {
                self.payloads.lock().unwrap().push(payload);
                if self.fail {
                    Err(SentinelError::DeliveryFailed("device offline".into()))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    #[derive(Default)]
    struct MemoryScreenshots {
        saved: std::sync::Mutex<Vec<(String, Frame, Percent)>>,
    }

    impl ScreenshotStore for MemoryScreenshots {
        fn reference_for(&self, event_id: &str) -> String {
            format!("mem://{}", event_id)
        }

        fn save<'a>(&'a self, reference: &'a str, frame: Frame, quality: Percent) -> BoxFuture<'a, Result<()>> {
            async move {
                self.saved
                    .lock()
                    .unwrap()
                    .push((reference.to_string(), frame, quality));
                Ok(())
            }
            .boxed()
        }
    }

    /// A scheduler whose ticker never fires during a test; cycles are driven
    /// with `tick_now`.
    fn manual(source: Arc<ScriptedSource>, sink: Arc<RecordingSink>) -> MonitoringScheduler {
        MonitoringScheduler::builder(source, sink)
            .config(MonitorConfig::new().with_tick_interval(Duration::from_secs(3600)))
            .build()
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(2000));
        assert_eq!(config.capture_timeout, Duration::from_secs(10));
        assert_eq!(config.delivery_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_builder() {
        let config = MonitorConfig::new()
            .with_tick_interval(Duration::ZERO)
            .with_capture_timeout(Duration::from_millis(250))
            .with_delivery_timeout(Duration::from_secs(1));
        assert_eq!(config.tick_interval, Duration::from_millis(1));
        assert_eq!(config.capture_timeout, Duration::from_millis(250));
        assert_eq!(config.delivery_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_start_with_failing_capture_stays_idle() {
        let scheduler = manual(ScriptedSource::new(vec![]), RecordingSink::new());
        let err = scheduler.start().await.unwrap_err();
        assert!(err.is_capture_failure());
        assert_eq!(scheduler.status().await, MonitorStatus::Idle);
        assert!(scheduler.reference_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_start_sets_reference_and_last_frame() {
        let reference = calm();
        let scheduler = manual(ScriptedSource::new(vec![reference.clone()]), RecordingSink::new());
        scheduler.start().await.unwrap();

        assert_eq!(scheduler.status().await, MonitorStatus::Active);
        assert_eq!(scheduler.reference_frame().await, Some(reference.clone()));
        assert_eq!(scheduler.last_frame().await, Some(reference));
        assert!(!scheduler.alert_pending().await);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let scheduler = manual(ScriptedSource::new(vec![calm(), calm()]), RecordingSink::new());
        scheduler.start().await.unwrap();
        let err = scheduler.start().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot start while active");
    }

    #[tokio::test]
    async fn test_identical_frames_do_not_alert() {
        let sink = RecordingSink::new();
        let scheduler = manual(ScriptedSource::new(vec![calm(), calm()]), sink.clone());
        scheduler.start().await.unwrap();

        let outcome = scheduler.tick_now().await;
        assert!(matches!(outcome, CycleOutcome::NoChange(m) if m.pixel_ratio == 0.0));
        assert!(scheduler.history().await.is_empty());
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_alert_is_debounced_until_reference_reset() {
        let source = ScriptedSource::new(vec![calm(), bright(), bright()]);
        let sink = RecordingSink::new();
        let scheduler = manual(source.clone(), sink.clone());
        scheduler.start().await.unwrap();

        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Alerted(_)));
        assert!(scheduler.alert_pending().await);
        assert!(scheduler.last_alert_at().await.is_some());

        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Suppressed(_)));
        assert_eq!(scheduler.history().await.len(), 1);
        assert_eq!(sink.delivered().len(), 1);

        // Acknowledge with a calm reference; the same change alerts again.
        source.push(calm());
        scheduler.reset_reference().await.unwrap();
        assert!(!scheduler.alert_pending().await);

        source.push(bright());
        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Alerted(_)));
        assert_eq!(scheduler.history().await.len(), 2);
        assert_eq!(sink.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_reference_is_used_by_next_tick() {
        let source = ScriptedSource::new(vec![calm(), bright(), bright()]);
        let scheduler = manual(source, RecordingSink::new());
        scheduler.start().await.unwrap();
        scheduler.reset_reference().await.unwrap();

        assert_eq!(scheduler.reference_frame().await, Some(bright()));
        assert!(matches!(scheduler.tick_now().await, CycleOutcome::NoChange(_)));
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_reference_and_latch() {
        let scheduler = manual(ScriptedSource::new(vec![calm(), bright()]), RecordingSink::new());
        scheduler.start().await.unwrap();
        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Alerted(_)));

        let err = scheduler.reset_reference().await.unwrap_err();
        assert!(err.is_capture_failure());
        assert!(scheduler.alert_pending().await);
        assert_eq!(scheduler.reference_frame().await, Some(calm()));
    }

    #[tokio::test]
    async fn test_reset_while_idle_is_rejected() {
        let scheduler = manual(ScriptedSource::new(vec![calm()]), RecordingSink::new());
        let err = scheduler.reset_reference().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot reset reference while idle");
    }

    #[tokio::test]
    async fn test_capture_failure_skips_tick() {
        let scheduler = manual(ScriptedSource::new(vec![calm()]), RecordingSink::new());
        scheduler.start().await.unwrap();

        assert!(matches!(scheduler.tick_now().await, CycleOutcome::CaptureFailed(_)));
        assert_eq!(scheduler.status().await, MonitorStatus::Active);
        assert_eq!(scheduler.last_frame().await, Some(calm()));
        assert!(scheduler.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_yields_no_verdict() {
        let larger = Frame::solid(3, 3, BRIGHT);
        let scheduler = manual(ScriptedSource::new(vec![calm(), larger.clone()]), RecordingSink::new());
        scheduler.start().await.unwrap();

        let outcome = scheduler.tick_now().await;
        assert!(matches!(outcome, CycleOutcome::NoVerdict(ref reason) if reason.contains("differ")));
        assert_eq!(scheduler.last_frame().await, Some(larger));
        assert!(!scheduler.alert_pending().await);
        assert!(scheduler.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_quarter_change_at_threshold_does_not_alert() {
        let changed = calm().with_pixel(0, 0, BRIGHT);
        let source = ScriptedSource::new(vec![calm(), changed.clone()]);
        let scheduler = manual(source.clone(), RecordingSink::new());
        scheduler.start().await.unwrap();

        // One of four pixels is exactly 25%, which does not exceed the threshold.
        let outcome = scheduler.tick_now().await;
        assert!(matches!(outcome, CycleOutcome::NoChange(m) if m.pixel_ratio == 25.0));

        scheduler
            .settings()
            .write()
            .await
            .detection
            .config_mut(Criterion::Pixel)
            .set_parameter(24.9);
        source.push(changed);
        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Alerted(_)));
    }

    #[tokio::test]
    async fn test_alert_event_contents() {
        let sink = RecordingSink::new();
        let scheduler = manual(ScriptedSource::new(vec![calm(), bright()]), sink.clone());
        scheduler.start().await.unwrap();

        let CycleOutcome::Alerted(event) = scheduler.tick_now().await else {
            panic!("expected an alert");
        };
        assert_eq!(event.criterion, Criterion::Pixel);
        assert_eq!(event.confidence, 100.0);
        assert_eq!(event.region, None);
        assert_eq!(event.screenshot_ref, None);
        assert_eq!(
            event.description,
            "Pixel change detected: 100.0% changed; Color block change detected: 100.0% changed"
        );
        assert_eq!(scheduler.history().await, vec![event]);

        let payload = &sink.delivered()[0];
        assert_eq!(payload.title, crate::actions::ALERT_TITLE);
        assert!(payload.push);
    }

    #[tokio::test]
    async fn test_screenshot_is_referenced_and_saved() {
        let store = Arc::new(MemoryScreenshots::default());
        let scheduler = MonitoringScheduler::builder(ScriptedSource::new(vec![calm(), bright()]), RecordingSink::new())
            .config(MonitorConfig::new().with_tick_interval(Duration::from_secs(3600)))
            .screenshot_store(store.clone())
            .build();
        scheduler.start().await.unwrap();

        let CycleOutcome::Alerted(event) = scheduler.tick_now().await else {
            panic!("expected an alert");
        };
        let expected = format!("mem://{}", event.id);
        assert_eq!(event.screenshot_ref.as_deref(), Some(expected.as_str()));

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, expected);
        assert_eq!(saved[0].1, bright());
        assert_eq!(saved[0].2, Percent::new(80.0));
    }

    #[tokio::test]
    async fn test_region_edits_apply_on_next_tick() {
        let settings = MonitorSettings::default().into_handle();
        let left_half = settings
            .write()
            .await
            .regions
            .add(Rect::new(0.0, 0.0, 50.0, 100.0), Some("Door".into()))
            .unwrap();

        let right_changed = calm().with_pixel(1, 0, BRIGHT).with_pixel(1, 1, BRIGHT);
        let source = ScriptedSource::new(vec![calm(), right_changed.clone()]);
        let scheduler = MonitoringScheduler::builder(source.clone(), RecordingSink::new())
            .config(MonitorConfig::new().with_tick_interval(Duration::from_secs(3600)))
            .settings(settings.clone())
            .build();
        scheduler.start().await.unwrap();

        let outcome = scheduler.tick_now().await;
        assert!(matches!(outcome, CycleOutcome::NoChange(m) if m.considered_pixels == 2));

        settings.write().await.regions.remove(&left_half);
        source.push(right_changed);
        let CycleOutcome::Alerted(event) = scheduler.tick_now().await else {
            panic!("expected an alert once the whole frame is watched");
        };
        assert_eq!(event.confidence, 50.0);
        assert_eq!(event.region, None);
    }

    #[tokio::test]
    async fn test_alert_names_active_regions() {
        let settings = MonitorSettings::default().into_handle();
        settings
            .write()
            .await
            .regions
            .add(Rect::new(0.0, 0.0, 100.0, 100.0), Some("Door".into()))
            .unwrap();
        let sink = RecordingSink::new();
        let scheduler = MonitoringScheduler::builder(ScriptedSource::new(vec![calm(), bright()]), sink.clone())
            .config(MonitorConfig::new().with_tick_interval(Duration::from_secs(3600)))
            .settings(settings)
            .build();
        scheduler.start().await.unwrap();

        let CycleOutcome::Alerted(event) = scheduler.tick_now().await else {
            panic!("expected an alert");
        };
        assert_eq!(event.region.as_deref(), Some("Door"));
        assert!(event.description.ends_with(" in Door"));
        assert!(sink.delivered()[0].body.ends_with(" in Door"));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_ledger_entry() {
        let sink = RecordingSink::failing();
        let scheduler = manual(ScriptedSource::new(vec![calm(), bright()]), sink.clone());
        scheduler.start().await.unwrap();

        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Alerted(_)));
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(scheduler.history().await.len(), 1);
        assert!(scheduler.alert_pending().await);
    }

    #[tokio::test]
    async fn test_nothing_to_deliver_skips_sink() {
        let sink = RecordingSink::new();
        let scheduler = manual(ScriptedSource::new(vec![calm(), bright()]), sink.clone());
        {
            let handle = scheduler.settings();
            let mut settings = handle.write().await;
            settings.actions.play_sound.enabled = false;
            settings.actions.vibrate.enabled = false;
            settings.actions.push_alert.enabled = false;
            settings.actions.screenshot.enabled = false;
        }
        scheduler.start().await.unwrap();

        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Alerted(_)));
        assert!(sink.delivered().is_empty());
        assert_eq!(scheduler.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_clears_session_and_is_idempotent() {
        let scheduler = manual(ScriptedSource::new(vec![calm(), bright()]), RecordingSink::new());
        scheduler.start().await.unwrap();
        assert!(matches!(scheduler.tick_now().await, CycleOutcome::Alerted(_)));

        scheduler.stop().await;
        assert_eq!(scheduler.status().await, MonitorStatus::Idle);
        assert!(scheduler.reference_frame().await.is_none());
        assert!(scheduler.last_frame().await.is_none());
        assert!(!scheduler.alert_pending().await);

        scheduler.stop().await;
        assert_eq!(scheduler.status().await, MonitorStatus::Idle);
        assert_eq!(scheduler.tick_now().await, CycleOutcome::Inactive);
        assert_eq!(scheduler.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_clear_and_export() {
        let scheduler = manual(ScriptedSource::new(vec![calm(), bright()]), RecordingSink::new());
        scheduler.start().await.unwrap();
        scheduler.tick_now().await;

        let text = String::from_utf8(scheduler.export_history(ExportFormat::PlainText).await).unwrap();
        assert!(text.contains("Pixel change detected: 100.0% changed"));
        assert!(text.ends_with("(100%)\n"));

        scheduler.clear_history().await;
        assert!(scheduler.history().await.is_empty());
        assert!(scheduler.export_history(ExportFormat::Csv).await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_lifecycle() {
        let scheduler = manual(ScriptedSource::new(vec![calm(), bright()]), RecordingSink::new());
        let mut events = scheduler.subscribe();

        scheduler.start().await.unwrap();
        scheduler.tick_now().await;
        scheduler.stop().await;

        assert!(matches!(events.recv().await.unwrap(), MonitorEvent::Started { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            MonitorEvent::Cycle(CycleOutcome::Alerted(_))
        ));
        assert_eq!(events.recv().await.unwrap(), MonitorEvent::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_drives_cycles_until_stopped() {
        let source = ScriptedSource::new(vec![calm(), bright()]);
        let scheduler = MonitoringScheduler::builder(source.clone(), RecordingSink::new()).build();
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(scheduler.history().await.len(), 1);
        assert_eq!(source.remaining(), 0);

        scheduler.stop().await;
        source.push(bright());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_timeout_leaves_scheduler_idle() {
        let scheduler = MonitoringScheduler::builder(Arc::new(HangingSource), RecordingSink::new())
            .config(MonitorConfig::new().with_capture_timeout(Duration::from_millis(50)))
            .build();

        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(err, SentinelError::CaptureTimedOut(_)));
        assert_eq!(scheduler.status().await, MonitorStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_start_leaves_scheduler_idle() {
        let scheduler = MonitoringScheduler::builder(Arc::new(HangingSource), RecordingSink::new()).build();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), scheduler.start()).await;
        assert!(abandoned.is_err());
        assert_eq!(scheduler.status().await, MonitorStatus::Idle);
        assert!(scheduler.reference_frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_capture_discards_frame() {
        let source = ScriptedSource::slow(vec![calm(), bright()], Duration::from_secs(1));
        let scheduler = manual(source, RecordingSink::new());
        scheduler.start().await.unwrap();

        let ticking = scheduler.clone();
        let tick = tokio::spawn(async move { ticking.tick_now().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        scheduler.stop().await;
        assert_eq!(tick.await.unwrap(), CycleOutcome::Inactive);
        assert_eq!(scheduler.status().await, MonitorStatus::Idle);
        assert!(scheduler.history().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_manual_ticks_run_one_after_another() {
        let older = calm().with_pixel(0, 0, BRIGHT);
        let source = TimedSource::new(vec![
            (calm(), Duration::ZERO),
            (older.clone(), Duration::from_millis(500)),
            (bright(), Duration::from_millis(10)),
        ]);
        let scheduler = MonitoringScheduler::builder(source.clone(), RecordingSink::new())
            .config(MonitorConfig::new().with_tick_interval(Duration::from_secs(3600)))
            .build();
        scheduler.start().await.unwrap();

        let (first, second) = tokio::join!(scheduler.tick_now(), scheduler.tick_now());

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(matches!(first, CycleOutcome::NoChange(_)));
        assert!(matches!(second, CycleOutcome::Alerted(_)));
        assert_eq!(scheduler.last_frame().await, Some(bright()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_delay_ticks_instead_of_overlapping() {
        let mut frames = vec![(calm(), Duration::ZERO)];
        frames.extend((0..20).map(|_| (calm(), Duration::from_millis(250))));
        let source = TimedSource::new(frames);
        let scheduler = MonitoringScheduler::builder(source.clone(), RecordingSink::new())
            .config(MonitorConfig::new().with_tick_interval(Duration::from_millis(100)))
            .build();
        scheduler.start().await.unwrap();

        // A manual tick lands while the first ticker cycle is still capturing.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let manual_tick = scheduler.clone();
        let manual_tick = tokio::spawn(async move { manual_tick.tick_now().await });

        tokio::time::sleep(Duration::from_millis(1850)).await;
        scheduler.stop().await;
        assert!(matches!(manual_tick.await.unwrap(), CycleOutcome::NoChange(_)));

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        // One reference capture plus back-to-back 250 ms cycles from t = 100 ms.
        let captures = source.captures.load(Ordering::SeqCst);
        assert!((3..=10).contains(&captures), "captures = {}", captures);
    }
}
