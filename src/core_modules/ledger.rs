// THEORY:
// The `DetectionLedger` is the engine's memory of what it has seen. It is an
// append-only, ordered log of `DetectionEvent`s: one event per alert that survived
// the debounce latch. Events are immutable once appended and only disappear through
// `clear` (or, for a bounded ledger, by ageing out as the oldest entry).
//
// Order invariant: the ledger stores events oldest first. `newest_first` gives
// the display order without changing the stored order.
//
// Export is a pure formatting step. The ledger renders bytes; writing them
// anywhere is the caller's business.
//
//   plaintext: `<RFC 3339 timestamp>: <description> (<confidence>%)`
//   csv:       `<RFC 3339 timestamp>,<criterion>,<confidence>%,<description>`
//
// The CSV flavour has no header row and no quoting, matching the historical
// output. A description containing a comma therefore spills into extra columns.
//
// Every event is exactly one line in both formats: backslashes and line breaks in
// the description are escaped (`\\`, `\n`, `\r`), and `parse_plaintext` undoes it.

use std::collections::VecDeque;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core_modules::policy::Criterion;
use crate::error::{Result, SentinelError};

/// One significant change that triggered an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub criterion: Criterion,
    /// Percentage in `[0, 100]`.
    pub confidence: f64,
    pub screenshot_ref: Option<String>,
    /// Name(s) of the region(s) that scoped the comparison.
    pub region: Option<String>,
    pub description: String,
}

impl DetectionEvent {
    /// Creates an event with a fresh id, stamped now.
    pub fn new(criterion: Criterion, confidence: f64, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            criterion,
            confidence,
            screenshot_ref: None,
            region: None,
            description: description.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_screenshot_ref(mut self, reference: impl Into<String>) -> Self {
        self.screenshot_ref = Some(reference.into());
        self
    }

    fn export_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// Text formats the ledger can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    PlainText,
    Csv,
}

impl ExportFormat {
    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::PlainText => "txt",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" | "plaintext" => Ok(ExportFormat::PlainText),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(SentinelError::Export(format!("unknown export format '{}'", other))),
        }
    }
}

/// A `(timestamp, description, confidence)` tuple read back from a plaintext export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub confidence: f64,
}

/// Ordered log of detection events, oldest first.
#[derive(Debug, Clone, Default)]
pub struct DetectionLedger {
    events: VecDeque<DetectionEvent>,
    capacity: Option<usize>,
}

impl DetectionLedger {
    /// An unbounded ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger holding at most `capacity` events (at least one). When full, the
    /// oldest event is evicted on append.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn capacity_limit(&self) -> Option<usize> {
        self.capacity
    }

    pub fn append(&mut self, event: DetectionEvent) {
        if let Some(capacity) = self.capacity {
            while self.events.len() >= capacity {
                self.events.pop_front();
            }
        }
        self.events.push_back(event);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// All events, oldest first.
    pub fn all(&self) -> Vec<DetectionEvent> {
        self.events.iter().cloned().collect()
    }

    /// All events, newest first.
    pub fn newest_first(&self) -> Vec<DetectionEvent> {
        self.events.iter().rev().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Renders the ledger, oldest first, one line per event.
    pub fn export(&self, format: ExportFormat) -> Vec<u8> {
        let mut out = String::new();
        for event in &self.events {
            let line = match format {
                ExportFormat::PlainText => format!(
                    "{}: {} ({}%)",
                    event.export_timestamp(),
                    escape_line(&event.description),
                    event.confidence
                ),
                ExportFormat::Csv => format!(
                    "{},{},{}%,{}",
                    event.export_timestamp(),
                    event.criterion,
                    event.confidence,
                    escape_line(&event.description)
                ),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out.into_bytes()
    }
}

fn escape_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_line(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

/// Reads a plaintext export back into records. Blank lines are skipped.
pub fn parse_plaintext(text: &str) -> Result<Vec<ExportRecord>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_plaintext_line)
        .collect()
}

fn parse_plaintext_line(line: &str) -> Result<ExportRecord> {
    let malformed = || SentinelError::Export(format!("malformed line '{}'", line));

    // RFC 3339 timestamps contain ':' but never ": ".
    let (timestamp, rest) = line.split_once(": ").ok_or_else(malformed)?;
    let (description, confidence) = rest.rsplit_once(" (").ok_or_else(malformed)?;
    let confidence = confidence.strip_suffix("%)").ok_or_else(malformed)?;

    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| SentinelError::Export(format!("bad timestamp in '{}': {}", line, e)))?
        .with_timezone(&Utc);
    let confidence = confidence
        .parse::<f64>()
        .map_err(|e| SentinelError::Export(format!("bad confidence in '{}': {}", line, e)))?;

    let description = unescape_line(description)
        .ok_or_else(|| SentinelError::Export(format!("bad escape in '{}'", line)))?;

    Ok(ExportRecord {
        timestamp,
        description,
        confidence,
    })
}
