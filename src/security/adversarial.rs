//! Adversarial transcript filter
//!
//! Drops interaction records that carry manipulation attempts or heavy abuse
//! before they can be mined for learnings. Pure and order-independent: each
//! record is judged on its own transcript.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::prompt::{detect_manipulation, profanity_count, ManipulationSignature};
use crate::types::InteractionRecord;

/// Why a record was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    Manipulation { signature: ManipulationSignature },
    Profanity { count: usize },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Manipulation { signature } => write!(f, "manipulation ({})", signature),
            DropReason::Profanity { count } => write!(f, "profanity ({} tokens)", count),
        }
    }
}

/// Result of filtering a batch
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub kept: Vec<InteractionRecord>,
    pub dropped: Vec<(String, DropReason)>,
}

impl FilterOutcome {
    pub fn drop_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Filters manipulation- and abuse-tainted transcripts
#[derive(Debug, Clone)]
pub struct AdversarialFilter {
    profanity_threshold: usize,
}

impl AdversarialFilter {
    pub fn new(profanity_threshold: usize) -> Self {
        Self { profanity_threshold }
    }

    /// Judge a single transcript
    pub fn check(&self, transcript: &str) -> Option<DropReason> {
        if let Some(signature) = detect_manipulation(transcript) {
            return Some(DropReason::Manipulation { signature });
        }

        let count = profanity_count(transcript);
        if count > self.profanity_threshold {
            return Some(DropReason::Profanity { count });
        }

        None
    }

    /// Split a batch into kept records and dropped ids
    pub fn filter(&self, records: Vec<InteractionRecord>) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();

        for record in records {
            match self.check(&record.transcript) {
                Some(reason) => {
                    debug!(interaction_id = %record.id, reason = %reason, "Dropping interaction");
                    outcome.dropped.push((record.id, reason));
                }
                None => outcome.kept.push(record),
            }
        }

        if outcome.drop_count() > 0 {
            info!(
                dropped = outcome.drop_count(),
                kept = outcome.kept.len(),
                "Adversarial filter removed tainted interactions"
            );
        }

        outcome
    }
}
