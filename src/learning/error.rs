use std::path::PathBuf;
use thiserror::Error;

use crate::security::guard::CoreBehaviorViolation;

/// Call platform could not deliver the window's interactions
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Call platform request failed for agent {agent_id}: {source:#}")]
    Platform {
        agent_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Synthesizer failed or answered with something unusable
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Synthesis service failed: {0:#}")]
    Service(#[source] anyhow::Error),

    #[error("Synthesis response is not a valid proposal: {reason} (response: {excerpt})")]
    Malformed { reason: String, excerpt: String },

    #[error("Synthesis response was empty")]
    Empty,
}

/// Knowledge base synchronization failures
#[derive(Error, Debug)]
pub enum SyncError {
    /// Nothing destructive has happened yet
    #[error("Failed to snapshot knowledge base {target}: {source:#}")]
    Snapshot {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write staging file {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The old knowledge base is gone and the new one was never made.
    /// The merged set survives only in the staging file.
    #[error("Failed to create knowledge base '{name}' ({documents} documents staged at {}): {source:#}", staged_at.display())]
    Create {
        name: String,
        documents: usize,
        staged_at: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to link knowledge base {kb_id} to agent {agent_id}: {source:#}")]
    Link {
        agent_id: String,
        kb_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Agent configuration call failed for {agent_id}: {source:#}")]
    Agent {
        agent_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    /// Create failures leave no knowledge base behind
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Create { .. })
    }
}

/// Anything that ends a cycle early
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    CoreBehavior(#[from] CoreBehaviorViolation),
}
