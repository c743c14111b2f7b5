//! Call Learner - continuous learning for a voice customer-service agent
//!
//! Mines finished call transcripts for recurring problems and merges safe,
//! validated improvements into the agent's knowledge base:
//! - Adversarial filtering and coordinated-attack gating of transcripts
//! - Deterministic pattern extraction into an analysis summary
//! - LLM-backed improvement synthesis (OpenRouter by default)
//! - Fail-closed safety validation and a core-behavior guard
//! - Approval queue for significant changes
//! - Loss-free knowledge base synchronization over a whole-resource store
//! - Cron-driven scheduler with an injectable clock
//!
//! # Example
//!
//! ```ignore
//! use call_learner::{Config, CycleServices, LearningCycle, LearningScheduler, SystemClock};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let data_dir = config.resolve_data_dir()?;
//!     let services = CycleServices::http(&config)?;
//!     let config = Arc::new(config);
//!     let cycle = LearningCycle::new(config.clone(), services, &data_dir);
//!     let scheduler = LearningScheduler::new(cycle, &config, Arc::new(SystemClock), &data_dir)?;
//!     let report = scheduler.trigger_now().await?;
//!     println!("{}", report.outcome);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod config;
pub mod security;
pub mod agent;
pub mod learning;
pub mod scheduler;
pub mod cli;

pub use config::Config;

pub use learning::{
    AnalysisSummary,
    CycleOutcome,
    CycleReport,
    CycleServices,
    ImprovementProposal,
    KnowledgeDocument,
    LearningCycle,
};

pub use scheduler::{Clock, LearningScheduler, ManualClock, SystemClock};

pub use types::{AnalysisWindow, InteractionRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Longest prefix of `s` with at most `max_chars` characters
pub fn truncate_safe(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
