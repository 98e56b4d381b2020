// THEORY:
// The `actions` module decides what happens once a change is confirmed. It is
// purely descriptive: the engine never plays a sound or buzzes a device itself.
//
// Key architectural principles:
// 1.  **Config in, payload out**: `ActionConfig` mirrors the operator's toggles.
//     `AlertPayload::compose` turns it, plus the verdict and the recorded event,
//     into one message for the alert collaborator.
// 2.  **Cues only for enabled actions**: A disabled action has no cue at all in
//     the payload. A payload with nothing enabled is not delivered, though the
//     detection is still recorded.

use serde::{Deserialize, Serialize};

use crate::core_modules::ledger::DetectionEvent;
use crate::core_modules::percent::Percent;
use crate::core_modules::policy::Verdict;

/// Alert title used for every change alert.
pub const ALERT_TITLE: &str = "Scene Change Detected!";
/// Lead sentence of every alert body.
pub const ALERT_BODY: &str = "Significant changes detected in monitored area";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundAction {
    pub enabled: bool,
    pub volume: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VibrateAction {
    pub enabled: bool,
    pub intensity: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PushAction {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotAction {
    pub enabled: bool,
    pub quality: Percent,
}

/// Actions to take after a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionConfig {
    pub play_sound: SoundAction,
    pub vibrate: VibrateAction,
    pub push_alert: PushAction,
    pub screenshot: ScreenshotAction,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            play_sound: SoundAction {
                enabled: true,
                volume: Percent::new(70.0),
            },
            vibrate: VibrateAction {
                enabled: true,
                intensity: Percent::new(50.0),
            },
            push_alert: PushAction { enabled: true },
            screenshot: ScreenshotAction {
                enabled: true,
                quality: Percent::new(80.0),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundCue {
    pub volume: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VibrationCue {
    pub intensity: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotCue {
    pub quality: Percent,
}

/// What the alert collaborator is asked to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub title: String,
    pub body: String,
    /// Whether a push notification should be shown.
    pub push: bool,
    pub sound: Option<SoundCue>,
    pub vibrate: Option<VibrationCue>,
    pub screenshot: Option<ScreenshotCue>,
}

impl AlertPayload {
    /// Builds the payload for a confirmed detection. Cues are present only for
    /// enabled actions.
    pub fn compose(actions: &ActionConfig, verdict: &Verdict, event: &DetectionEvent) -> Self {
        let fired: Vec<&str> = verdict.fired().iter().map(|f| f.criterion.label()).collect();
        let mut body = ALERT_BODY.to_string();
        if !fired.is_empty() {
            body.push_str(&format!(" ({})", fired.join(", ")));
        }
        if let Some(region) = &event.region {
            body.push_str(&format!(" in {}", region));
        }

        Self {
            title: ALERT_TITLE.to_string(),
            body,
            push: actions.push_alert.enabled,
            sound: actions.play_sound.enabled.then_some(SoundCue {
                volume: actions.play_sound.volume,
            }),
            vibrate: actions.vibrate.enabled.then_some(VibrationCue {
                intensity: actions.vibrate.intensity,
            }),
            screenshot: actions.screenshot.enabled.then_some(ScreenshotCue {
                quality: actions.screenshot.quality,
            }),
        }
    }

    /// Whether there is anything for the alert collaborator to do.
    pub fn is_deliverable(&self) -> bool {
        self.push || self.sound.is_some() || self.vibrate.is_some() || self.screenshot.is_some()
    }
}
