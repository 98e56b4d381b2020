// THEORY:
// The `DetectionPolicy` turns raw change metrics into a verdict. It is the only
// place where user-facing knobs (enable flags, thresholds) meet measured numbers.
//
// Key architectural principles:
// 1.  **Uniform criteria**: The three criteria form a closed set (`Criterion`), and
//     each is judged by the same contract: an enabled criterion fires when its
//     metric is strictly greater than its configured parameter. Adding a criterion
//     means adding a variant, not a branch in the combination logic.
// 2.  **Disabled means silent**: A disabled criterion never fires, whatever its
//     metric. How the flag got set is not the policy's concern.
// 3.  **OR combination, full record**: The verdict is positive when any criterion
//     fires, and every criterion that fired is recorded with its metric. Ties are
//     kept, never collapsed to a single winner.

use serde::{Deserialize, Serialize};

use crate::core_modules::comparator::ChangeMetrics;
use crate::core_modules::percent::Percent;

/// One of the independent change-detection criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    /// Fine-grained per-pixel difference ratio.
    Pixel,
    /// Block-averaged color change ratio.
    Color,
    /// Text content change confidence, from an external probe.
    Text,
}

impl Criterion {
    /// All criteria, in precedence order.
    pub const ALL: [Criterion; 3] = [Criterion::Pixel, Criterion::Color, Criterion::Text];

    /// The short machine name used in exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::Pixel => "pixel",
            Criterion::Color => "color",
            Criterion::Text => "text",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Criterion::Pixel => "Pixel change",
            Criterion::Color => "Color block change",
            Criterion::Text => "Text change",
        }
    }

    /// Describes a metric value of this criterion in words.
    pub fn describe(&self, metric: f64) -> String {
        match self {
            Criterion::Pixel | Criterion::Color => {
                format!("{} detected: {:.1}% changed", self.label(), metric)
            }
            Criterion::Text => format!("{} detected: {:.1}% confidence", self.label(), metric),
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enable flag and parameter of one criterion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionConfig {
    pub enabled: bool,
    /// Threshold (pixel, color) or minimum confidence (text).
    pub parameter: Percent,
}

impl CriterionConfig {
    pub fn new(enabled: bool, parameter: f64) -> Self {
        Self {
            enabled,
            parameter: Percent::new(parameter),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0.0)
    }

    pub fn set_parameter(&mut self, parameter: f64) {
        self.parameter = Percent::new(parameter);
    }

    /// Whether a metric trips this criterion. The comparison is strict.
    pub fn fires(&self, metric: f64) -> bool {
        self.enabled && metric > self.parameter.value()
    }
}

/// Configuration of all criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectionSettings {
    /// How different a pixel must be to count as changed: the per-pixel cutoff is
    /// `765 * sensitivity / 100`. Shared by the pixel and color-block criteria.
    pub pixel_sensitivity: Percent,
    pub pixel: CriterionConfig,
    pub color_block: CriterionConfig,
    pub text: CriterionConfig,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            pixel_sensitivity: Percent::new(50.0),
            pixel: CriterionConfig::new(true, 25.0),
            color_block: CriterionConfig::new(true, 30.0),
            text: CriterionConfig::new(false, 80.0),
        }
    }
}

impl DetectionSettings {
    pub fn config(&self, criterion: Criterion) -> &CriterionConfig {
        match criterion {
            Criterion::Pixel => &self.pixel,
            Criterion::Color => &self.color_block,
            Criterion::Text => &self.text,
        }
    }

    pub fn config_mut(&mut self, criterion: Criterion) -> &mut CriterionConfig {
        match criterion {
            Criterion::Pixel => &mut self.pixel,
            Criterion::Color => &mut self.color_block,
            Criterion::Text => &mut self.text,
        }
    }

    pub fn set_pixel_sensitivity(&mut self, sensitivity: f64) {
        self.pixel_sensitivity = Percent::new(sensitivity);
    }
}

/// One criterion that fired, with the numbers that made it fire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Firing {
    pub criterion: Criterion,
    pub metric: f64,
    pub parameter: Percent,
}

/// The outcome of evaluating one set of metrics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Verdict {
    fired: Vec<Firing>,
}

impl Verdict {
    pub fn is_positive(&self) -> bool {
        !self.fired.is_empty()
    }

    /// Every criterion that fired, in `Criterion::ALL` order.
    pub fn fired(&self) -> &[Firing] {
        &self.fired
    }

    /// The highest-precedence criterion that fired.
    pub fn primary(&self) -> Option<&Firing> {
        self.fired.first()
    }
}

/// Combines metrics and criterion configs into a verdict.
pub struct DetectionPolicy;

impl DetectionPolicy {
    pub fn evaluate(metrics: &ChangeMetrics, settings: &DetectionSettings) -> Verdict {
        let fired = Criterion::ALL
            .iter()
            .filter_map(|&criterion| {
                let config = settings.config(criterion);
                let metric = metrics.metric(criterion);
                config.fires(metric).then_some(Firing {
                    criterion,
                    metric,
                    parameter: config.parameter,
                })
            })
            .collect();
        Verdict { fired }
    }
}
