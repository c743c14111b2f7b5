//! Continuous-learning pipeline
//!
//! Mines finished calls for recurring problems, asks the synthesizer for a
//! behavior change, and merges accepted changes into the agent's knowledge
//! base and behavior text without losing earlier learnings.

pub mod error;
pub mod http;
pub mod harvester;
pub mod extractor;
pub mod proposal;
pub mod synthesizer;
pub mod knowledge;
pub mod cache;
pub mod sync;
pub mod cycle_log;
pub mod cycle;

pub use cycle::{CycleOutcome, CycleReport, CycleServices, LearningCycle};
pub use cycle_log::{CycleLog, CycleLogEntry};
pub use error::{CycleError, HarvestError, SyncError, SynthesisError};
pub use extractor::{AnalysisSummary, IssueCategory, PatternExtractor, TranscriptAnalyzer};
pub use harvester::{Harvester, HarvestQuery, InteractionSource};
pub use knowledge::{AgentDirectory, AgentProfile, KnowledgeBase, KnowledgeDocument, KnowledgeStore};
pub use proposal::ImprovementProposal;
pub use synthesizer::{ImprovementSynthesizer, LlmSynthesizer};
pub use sync::{KnowledgeBaseSynchronizer, SyncReport};
