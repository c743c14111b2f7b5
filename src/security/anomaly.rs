//! Coordinated-attack detection
//!
//! A burst of near-identical transcripts inside the last rolling window looks
//! like scripted probing rather than organic customer variety. When one
//! transcript signature dominates the recent subset the whole cycle is vetoed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::config::LearningConfig;
use crate::types::InteractionRecord;

/// Evidence of a coordinated pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Normalized transcript prefix shared by the burst
    pub signature: String,
    /// Share of the recent subset carrying the signature, in percent
    pub share_percent: f64,
    /// Records carrying the signature
    pub matching: usize,
    /// Size of the recent subset that was inspected
    pub subset_size: usize,
}

impl std::fmt::Display for AnomalyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} recent interactions ({:.1}%) share the prefix \"{}\"",
            self.matching,
            self.subset_size,
            self.share_percent,
            crate::truncate_safe(&self.signature, 40)
        )
    }
}

/// Detects bursts of near-identical transcripts
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    window: Duration,
    min_subset: usize,
    prefix_chars: usize,
    max_share: f64,
}

impl AnomalyDetector {
    pub fn new(window: Duration, min_subset: usize, prefix_chars: usize, max_share: f64) -> Self {
        Self {
            window,
            min_subset,
            prefix_chars,
            max_share,
        }
    }

    pub fn from_config(config: &LearningConfig) -> Self {
        Self::new(
            Duration::minutes(i64::from(config.anomaly_window_minutes)),
            config.anomaly_min_subset,
            config.anomaly_prefix_chars,
            config.anomaly_max_share,
        )
    }

    /// Normalized signature: lowercase, whitespace collapsed, first N chars
    pub fn signature(&self, transcript: &str) -> String {
        transcript
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
            .chars()
            .take(self.prefix_chars)
            .collect()
    }

    /// Inspect records relative to `now`; `Some` means abort the cycle
    pub fn inspect(&self, records: &[InteractionRecord], now: DateTime<Utc>) -> Option<AnomalyReport> {
        let cutoff = now - self.window;
        let recent: Vec<&InteractionRecord> = records
            .iter()
            .filter(|r| r.timestamp >= cutoff && r.timestamp <= now)
            .collect();

        if recent.len() <= self.min_subset {
            return None;
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in &recent {
            let sig = self.signature(&record.transcript);
            if sig.is_empty() {
                continue;
            }
            *counts.entry(sig).or_default() += 1;
        }

        let subset_size = recent.len();
        let (signature, matching) = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))?;

        let share = matching as f64 / subset_size as f64;
        if share <= self.max_share {
            return None;
        }

        let report = AnomalyReport {
            signature,
            share_percent: share * 100.0,
            matching,
            subset_size,
        };
        warn!(report = %report, "Coordinated transcript pattern detected");
        Some(report)
    }
}
