//! Approval gate and pending-approval queue
//!
//! Small proposals apply within the cycle. Large ones are parked in a queue
//! file until an operator approves or rejects them.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::LearningConfig;
use crate::learning::extractor::AnalysisSummary;
use crate::learning::proposal::ImprovementProposal;

const QUEUE_FILE: &str = "pending_approvals.json";

/// Classifies proposals as significant or not
#[derive(Debug, Clone, Copy)]
pub struct ApprovalGate {
    max_priority_fixes: usize,
    max_new_sections: usize,
}

impl ApprovalGate {
    pub fn new(max_priority_fixes: usize, max_new_sections: usize) -> Self {
        Self {
            max_priority_fixes,
            max_new_sections,
        }
    }

    pub fn from_config(config: &LearningConfig) -> Self {
        Self::new(config.approval_max_priority_fixes, config.approval_max_new_sections)
    }

    /// Significant iff priority fixes exceed the limit or new sections exceed theirs
    pub fn is_significant(&self, proposal: &ImprovementProposal) -> bool {
        proposal.priority_fixes.len() > self.max_priority_fixes
            || proposal.new_sections.len() > self.max_new_sections
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::from_config(&LearningConfig::default())
    }
}

/// Lifecycle of a parked proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A proposal waiting on an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    /// Cycle that produced the proposal
    pub cycle_id: String,
    pub proposal: ImprovementProposal,
    /// Summary the proposal was synthesized from, used for document metadata
    #[serde(default)]
    pub summary: Option<AnalysisSummary>,
    pub submitted_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PendingApproval {
    pub fn new(cycle_id: &str, proposal: ImprovementProposal, summary: Option<AnalysisSummary>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_id: cycle_id.to_string(),
            proposal,
            summary,
            submitted_at: now,
            status: ApprovalStatus::Pending,
            decided_at: None,
            reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

/// File-backed approval queue
#[derive(Debug, Clone)]
pub struct ApprovalQueue {
    path: PathBuf,
}

impl ApprovalQueue {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(QUEUE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Vec<PendingApproval> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return Vec::new(),
        };

        match serde_json::from_str(&contents) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Approval queue is corrupt; starting empty");
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[PendingApproval]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create approvals directory")?;
        }
        let contents = serde_json::to_string_pretty(entries).context("Failed to serialize approvals")?;
        fs::write(&self.path, contents).context("Failed to write approval queue")?;
        Ok(())
    }

    /// Persist a new pending approval
    pub fn submit(&self, approval: PendingApproval) -> Result<()> {
        let mut entries = self.load();
        info!(
            approval_id = %approval.id,
            new_sections = approval.proposal.new_sections.len(),
            priority_fixes = approval.proposal.priority_fixes.len(),
            "Proposal parked for approval"
        );
        entries.push(approval);
        self.save(&entries)
    }

    /// All entries, or only pending ones
    pub fn list(&self, pending_only: bool) -> Vec<PendingApproval> {
        self.load()
            .into_iter()
            .filter(|a| !pending_only || a.is_pending())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<PendingApproval> {
        self.load().into_iter().find(|a| a.id == id)
    }

    pub fn pending_count(&self) -> usize {
        self.list(true).len()
    }

    /// Mark an entry approved and return it
    pub fn approve(&self, id: &str, now: DateTime<Utc>) -> Result<PendingApproval> {
        self.decide(id, ApprovalStatus::Approved, None, now)
    }

    /// Mark an entry rejected
    pub fn reject(&self, id: &str, reason: Option<String>, now: DateTime<Utc>) -> Result<PendingApproval> {
        self.decide(id, ApprovalStatus::Rejected, reason, now)
    }

    fn decide(
        &self,
        id: &str,
        status: ApprovalStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval> {
        let mut entries = self.load();
        let Some(entry) = entries.iter_mut().find(|a| a.id == id) else {
            bail!("No approval with id {}", id);
        };
        if !entry.is_pending() {
            bail!("Approval {} is already {}", id, entry.status);
        }

        entry.status = status;
        entry.decided_at = Some(now);
        entry.reason = reason;
        let decided = entry.clone();

        self.save(&entries)?;
        info!(approval_id = %id, status = %status, "Approval decided");
        Ok(decided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(sections: usize, fixes: usize) -> ImprovementProposal {
        let mut p = ImprovementProposal::default();
        for i in 0..sections {
            p.new_sections.insert(format!("Section {}", i), "Help the caller.".into());
        }
        p.priority_fixes = (0..fixes).map(|i| format!("Fix {}", i)).collect();
        p
    }

    #[test]
    fn test_gate_boundaries() {
        let gate = ApprovalGate::default();
        assert!(!gate.is_significant(&proposal(2, 0)));
        assert!(gate.is_significant(&proposal(3, 0)));
        assert!(!gate.is_significant(&proposal(0, 3)));
        assert!(gate.is_significant(&proposal(0, 4)));
        assert!(!gate.is_significant(&proposal(1, 0)));
    }

    #[test]
    fn test_submit_list_and_approve() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ApprovalQueue::new(dir.path());
        let now = Utc::now();

        let pending = PendingApproval::new("cycle-1", proposal(3, 0), None, now);
        let id = pending.id.clone();
        queue.submit(pending).unwrap();

        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.get(&id).unwrap().cycle_id, "cycle-1");

        let approved = queue.approve(&id, now).unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.list(false).len(), 1);

        assert!(queue.approve(&id, now).is_err());
    }

    #[test]
    fn test_reject_records_reason() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ApprovalQueue::new(dir.path());
        let pending = PendingApproval::new("cycle-2", proposal(0, 5), None, Utc::now());
        let id = pending.id.clone();
        queue.submit(pending).unwrap();

        let rejected = queue.reject(&id, Some("too broad".into()), Utc::now()).unwrap();
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
        assert_eq!(rejected.reason.as_deref(), Some("too broad"));
    }

    #[test]
    fn test_unknown_id_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ApprovalQueue::new(dir.path());
        assert!(queue.reject("missing", None, Utc::now()).is_err());
    }

    #[test]
    fn test_corrupt_queue_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ApprovalQueue::new(dir.path());
        fs::write(queue.path(), "{ not json").unwrap();
        assert!(queue.list(false).is_empty());
    }
}
