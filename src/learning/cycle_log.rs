//! Append-only cycle log (JSON Lines)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::proposal::ImprovementProposal;
use crate::types::AnalysisWindow;

const LOG_FILE: &str = "cycle_log.jsonl";

/// One line of the cycle log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleLogEntry {
    pub timestamp: DateTime<Utc>,
    pub cycle_id: String,
    #[serde(default)]
    pub window: Option<AnalysisWindow>,
    /// SHA-256 of the analysis summary, when one was produced
    #[serde(default)]
    pub summary_digest: Option<String>,
    #[serde(default)]
    pub proposal: Option<ImprovementProposal>,
    #[serde(default)]
    pub kb_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub detail: String,
}

/// Operator-facing history of every cycle outcome
#[derive(Debug, Clone)]
pub struct CycleLog {
    path: PathBuf,
}

impl CycleLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &CycleLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open cycle log {}", self.path.display()))?;

        let line = serde_json::to_string(entry).context("Failed to serialize cycle log entry")?;
        writeln!(file, "{}", line).context("Failed to append to cycle log")?;
        Ok(())
    }

    /// The last `limit` entries, oldest first; unparseable lines are skipped
    pub fn recent(&self, limit: usize) -> Result<Vec<CycleLogEntry>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to read cycle log"),
        };

        let mut entries: Vec<CycleLogEntry> = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = n + 1, error = %e, "Skipping unreadable cycle log line"),
            }
        }

        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}
