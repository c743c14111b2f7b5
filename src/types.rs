//! Shared types used across modules
//!
//! Interaction records are owned by the external call platform and are
//! read-only here. The analysis window is derived fresh every cycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Sentiment label assigned by the call platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Sentiment {
    /// The platform only emits a single negative label, so "strongly
    /// negative" collapses onto it.
    pub fn is_strongly_negative(&self) -> bool {
        matches!(self, Sentiment::Negative)
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
            Sentiment::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome flags the platform attaches to a finished call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFlags {
    #[serde(default)]
    pub successful: bool,
    #[serde(default)]
    pub in_voicemail: bool,
    #[serde(default)]
    pub sentiment: Sentiment,
}

/// One completed voice conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub outcome: OutcomeFlags,
    /// Free-form structured fields extracted by the platform
    #[serde(default)]
    pub custom_fields: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
}

impl InteractionRecord {
    /// Look up a custom field as a string
    pub fn custom_str(&self, key: &str) -> Option<&str> {
        self.custom_fields.get(key).and_then(|v| v.as_str())
    }
}

/// Time span of interactions considered in one learning cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    /// Derive the window for a cycle starting at `now`.
    ///
    /// `end` is always `now`. `start` is `last_run_at` clamped so that the
    /// window is at least `min_lookback_hours` and at most
    /// `max_lookback_hours` long. With no previous run the full maximum
    /// lookback is used.
    pub fn derive(
        now: DateTime<Utc>,
        last_run_at: Option<DateTime<Utc>>,
        min_lookback_hours: u32,
        max_lookback_hours: u32,
    ) -> Self {
        let max_lookback = Duration::hours(i64::from(max_lookback_hours.max(min_lookback_hours)));
        let min_lookback = Duration::hours(i64::from(min_lookback_hours));

        let earliest = now - max_lookback;
        let latest = now - min_lookback;

        let start = last_run_at.unwrap_or(earliest).max(earliest).min(latest);
        Self { start, end: now }
    }

    /// Whether a timestamp falls inside the window (inclusive on both ends)
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for AnalysisWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} .. {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}
