// THEORY:
// This file is the entry point for the `scene_sentinel` library crate. It defines
// the public API handed to front ends (a phone app, a desktop tool, the
// `sentinel_tester` harness).
//
// The high-level interface is the `MonitoringScheduler`: hand it a frame source
// and an alert sink, start it, and it watches the scene. Everything it needs to
// decide whether a scene changed lives in `core_modules` as pure, synchronous
// code (frames, regions, the comparator, the policy, the ledger). The async
// shell around it (`scheduler`, `collaborators`, `settings`) owns timing,
// I/O and shared state. `core_modules::utils` holds the image-file helpers and
// file-backed collaborators.

pub mod actions;
pub mod collaborators;
pub mod core_modules;
pub mod error;
pub mod scheduler;
pub mod settings;

pub use actions::{ActionConfig, AlertPayload};
pub use collaborators::{AlertSink, DeliveryResult, FrameSource, ScreenshotStore};
pub use core_modules::comparator::{ChangeMetrics, FrameComparator, NoTextProbe, TextChangeProbe};
pub use core_modules::frame::Frame;
pub use core_modules::ledger::{
    DetectionEvent, DetectionLedger, ExportFormat, ExportRecord, parse_plaintext,
};
pub use core_modules::percent::Percent;
pub use core_modules::pixel::pixel::Pixel;
pub use core_modules::policy::{
    Criterion, CriterionConfig, DetectionPolicy, DetectionSettings, Verdict,
};
pub use core_modules::region::{Rect, Region, RegionMask, RegionSet};
pub use error::{Result, SentinelError};
pub use scheduler::{
    CycleOutcome, MonitorConfig, MonitorEvent, MonitorStatus, MonitoringScheduler,
    SchedulerBuilder,
};
pub use settings::{MonitorSettings, SettingsHandle, load_settings, save_settings};
