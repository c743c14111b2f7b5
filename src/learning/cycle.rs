//! One learning cycle, end to end
//!
//! harvest → filter → anomaly gate → analyze → synthesize → validate → guard
//! → approval gate → synchronize → push behavior text. Strictly sequential;
//! each remote call is awaited before the next step starts. Every outcome is
//! written to the cycle log.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::cache::{KnowledgeBaseCache, SnapshotStaging};
use super::cycle_log::{CycleLog, CycleLogEntry};
use super::error::{CycleError, SyncError};
use super::extractor::{AnalysisSummary, PatternExtractor, TranscriptAnalyzer};
use super::harvester::{Harvester, HttpCallPlatform, InteractionSource};
use super::knowledge::{AgentDirectory, AgentProfile, HttpAgentDirectory, HttpKnowledgeStore, KnowledgeStore};
use super::proposal::ImprovementProposal;
use super::synthesizer::{ImprovementSynthesizer, LlmSynthesizer};
use super::sync::KnowledgeBaseSynchronizer;
use crate::agent::llm::{OpenRouterClient, ProviderConfig};
use crate::config::Config;
use crate::security::anomaly::{AnomalyDetector, AnomalyReport};
use crate::security::approval::{ApprovalGate, ApprovalQueue, PendingApproval};
use crate::security::guard::CoreBehaviorGuard;
use crate::security::adversarial::AdversarialFilter;
use crate::security::keyring::{self, KeyedService};
use crate::security::safety::{SafetyValidator, SafetyVerdict, Violation};
use crate::types::AnalysisWindow;

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Applied {
        kb_id: Option<String>,
        documents_added: usize,
        documents_superseded: usize,
        total_documents: usize,
        behavior_updated: bool,
    },
    ApprovalRequired {
        approval_id: String,
    },
    ApprovalQueueFailed {
        error: String,
    },
    InsufficientData {
        harvested: usize,
        /// Harvested records newer than the previous run
        fresh: usize,
        usable: usize,
        required: usize,
    },
    SafetyBlocked {
        violation: Violation,
        excerpt: String,
    },
    CoreBehaviorBlocked {
        missing: Vec<String>,
    },
    AnomalyBlocked {
        report: AnomalyReport,
    },
    HarvestFailed {
        error: String,
    },
    SynthesisFailed {
        error: String,
    },
    SyncFailed {
        error: String,
        fatal: bool,
    },
}

impl CycleOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            CycleOutcome::Applied { .. } => "applied",
            CycleOutcome::ApprovalRequired { .. } => "approval_required",
            CycleOutcome::ApprovalQueueFailed { .. } => "approval_queue_failed",
            CycleOutcome::InsufficientData { .. } => "insufficient_data",
            CycleOutcome::SafetyBlocked { .. } => "safety_blocked",
            CycleOutcome::CoreBehaviorBlocked { .. } => "core_behavior_blocked",
            CycleOutcome::AnomalyBlocked { .. } => "anomaly_blocked",
            CycleOutcome::HarvestFailed { .. } => "harvest_failed",
            CycleOutcome::SynthesisFailed { .. } => "synthesis_failed",
            CycleOutcome::SyncFailed { .. } => "sync_failed",
        }
    }

    /// Whether the window counts as examined
    ///
    /// Too little data counts only when something arrived since the previous
    /// run. Calls re-harvested through the minimum lookback overlap do not, so
    /// reruns with no new interactions leave `last_run_at` untouched.
    pub fn is_determinate(&self) -> bool {
        match self {
            CycleOutcome::InsufficientData { fresh, .. } => *fresh > 0,
            CycleOutcome::HarvestFailed { .. }
            | CycleOutcome::ApprovalQueueFailed { .. }
            | CycleOutcome::SynthesisFailed { .. }
            | CycleOutcome::SyncFailed { .. } => false,
            _ => true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleOutcome::SyncFailed { fatal: true, .. })
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Applied {
                kb_id,
                documents_added,
                documents_superseded,
                total_documents,
                behavior_updated,
            } => write!(
                f,
                "applied: {} added, {} superseded, {} total in {}{}",
                documents_added,
                documents_superseded,
                total_documents,
                kb_id.as_deref().unwrap_or("(no knowledge base change)"),
                if *behavior_updated { ", behavior text updated" } else { "" }
            ),
            CycleOutcome::ApprovalRequired { approval_id } => {
                write!(f, "approval required: {}", approval_id)
            }
            CycleOutcome::ApprovalQueueFailed { error } => {
                write!(f, "approval queue failed: {}", error)
            }
            CycleOutcome::InsufficientData {
                harvested,
                fresh,
                usable,
                required,
            } => write!(
                f,
                "insufficient data: {} usable of {} harvested ({} new), {} required",
                usable, harvested, fresh, required
            ),
            CycleOutcome::SafetyBlocked { violation, excerpt } => {
                write!(f, "safety blocked: {} ({:?})", violation, excerpt)
            }
            CycleOutcome::CoreBehaviorBlocked { missing } => {
                write!(f, "core behavior blocked: missing {}", missing.join(", "))
            }
            CycleOutcome::AnomalyBlocked { report } => write!(f, "anomaly blocked: {}", report),
            CycleOutcome::HarvestFailed { error } => write!(f, "harvest failed: {}", error),
            CycleOutcome::SynthesisFailed { error } => write!(f, "synthesis failed: {}", error),
            CycleOutcome::SyncFailed { error, fatal } => {
                write!(f, "sync failed{}: {}", if *fatal { " (FATAL)" } else { "" }, error)
            }
        }
    }
}

impl From<CycleError> for CycleOutcome {
    fn from(err: CycleError) -> Self {
        match err {
            CycleError::Harvest(e) => CycleOutcome::HarvestFailed { error: e.to_string() },
            CycleError::Synthesis(e) => CycleOutcome::SynthesisFailed { error: e.to_string() },
            CycleError::Sync(e) => CycleOutcome::SyncFailed {
                fatal: e.is_fatal(),
                error: e.to_string(),
            },
            CycleError::CoreBehavior(v) => CycleOutcome::CoreBehaviorBlocked { missing: v.missing },
        }
    }
}

/// Result of one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: String,
    pub window: Option<AnalysisWindow>,
    pub summary: Option<AnalysisSummary>,
    pub outcome: CycleOutcome,
}

/// External collaborators of a cycle
pub struct CycleServices {
    pub source: Arc<dyn InteractionSource>,
    pub analyzer: Arc<dyn TranscriptAnalyzer>,
    pub synthesizer: Arc<dyn ImprovementSynthesizer>,
    pub store: Arc<dyn KnowledgeStore>,
    pub directory: Arc<dyn AgentDirectory>,
}

impl CycleServices {
    /// HTTP-backed services built from the configuration and stored keys
    pub fn http(config: &Config) -> Result<Self> {
        let endpoints = &config.endpoints;
        let timeout = Duration::from_secs(endpoints.request_timeout_secs);

        let llm_key = keyring::get_api_key(KeyedService::Llm)?;
        let llm = OpenRouterClient::new(
            ProviderConfig::with_base_url(llm_key, endpoints.llm_base_url.clone()),
            timeout,
        )?;

        Ok(Self {
            source: Arc::new(HttpCallPlatform::new(
                &endpoints.call_platform_url,
                keyring::optional_api_key(KeyedService::CallPlatform),
                timeout,
            )?),
            analyzer: Arc::new(PatternExtractor::new(config.learning.max_examples_per_issue)),
            synthesizer: Arc::new(LlmSynthesizer::new(llm, endpoints.synthesis_model.clone())),
            store: Arc::new(HttpKnowledgeStore::new(
                &endpoints.knowledge_store_url,
                keyring::optional_api_key(KeyedService::KnowledgeStore),
                timeout,
            )?),
            directory: Arc::new(HttpAgentDirectory::new(
                &endpoints.agent_config_url,
                keyring::optional_api_key(KeyedService::AgentConfig),
                timeout,
            )?),
        })
    }
}

/// Outcome of a stage that can end the cycle early
enum Stage<T> {
    Continue(T),
    Stop(CycleOutcome),
}

/// Runs learning cycles for one agent
pub struct LearningCycle {
    config: Arc<Config>,
    harvester: Harvester,
    filter: AdversarialFilter,
    anomaly: AnomalyDetector,
    analyzer: Arc<dyn TranscriptAnalyzer>,
    synthesizer: Arc<dyn ImprovementSynthesizer>,
    validator: SafetyValidator,
    guard: CoreBehaviorGuard,
    gate: ApprovalGate,
    approvals: ApprovalQueue,
    directory: Arc<dyn AgentDirectory>,
    synchronizer: KnowledgeBaseSynchronizer,
    log: CycleLog,
}

impl LearningCycle {
    pub fn new(config: Arc<Config>, services: CycleServices, data_dir: &Path) -> Self {
        let learning = &config.learning;
        Self {
            harvester: Harvester::new(services.source, learning.harvest_limit),
            filter: AdversarialFilter::new(learning.profanity_threshold),
            anomaly: AnomalyDetector::from_config(learning),
            analyzer: services.analyzer,
            synthesizer: services.synthesizer,
            validator: SafetyValidator::new(),
            guard: CoreBehaviorGuard::from_identity(&config.identity),
            gate: ApprovalGate::from_config(learning),
            approvals: ApprovalQueue::new(data_dir),
            directory: services.directory.clone(),
            synchronizer: KnowledgeBaseSynchronizer::new(
                services.store,
                services.directory,
                KnowledgeBaseCache::new(data_dir),
                SnapshotStaging::new(data_dir),
            ),
            log: CycleLog::new(data_dir),
            config,
        }
    }

    pub fn approvals(&self) -> &ApprovalQueue {
        &self.approvals
    }

    pub fn log(&self) -> &CycleLog {
        &self.log
    }

    /// Run one cycle over `window`
    ///
    /// `last_run_at` is the previous determinate run; records at or before it
    /// were already examined. Errors are reserved for cycle log failures;
    /// every pipeline result is a [`CycleOutcome`].
    pub async fn run(
        &self,
        window: AnalysisWindow,
        last_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        let agent_id = self.config.agent.id.as_str();
        info!(cycle_id = %cycle_id, agent_id = %agent_id, window = %window, "Starting learning cycle");

        let mut summary = None;
        let mut proposal = None;
        let outcome = self
            .pipeline(&cycle_id, window, last_run_at, now, &mut summary, &mut proposal)
            .await;

        let report = CycleReport {
            cycle_id,
            window: Some(window),
            summary,
            outcome,
        };
        self.record(&report, proposal, now)?;
        Ok(report)
    }

    async fn pipeline(
        &self,
        cycle_id: &str,
        window: AnalysisWindow,
        last_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        summary_out: &mut Option<AnalysisSummary>,
        proposal_out: &mut Option<ImprovementProposal>,
    ) -> CycleOutcome {
        let agent_id = self.config.agent.id.as_str();
        let required = self.config.learning.min_interactions;

        let records = match self.harvester.harvest(agent_id, &window).await {
            Ok(records) => records,
            Err(e) => return CycleError::from(e).into(),
        };
        let harvested = records.len();
        let fresh = records
            .iter()
            .filter(|r| last_run_at.map_or(true, |last| r.timestamp > last))
            .count();

        let filtered = self.filter.filter(records);
        let dropped = filtered.drop_count();
        if dropped > 0 {
            info!(agent_id = %agent_id, dropped, kept = filtered.kept.len(), "Adversarial transcripts removed");
        }

        if filtered.kept.len() < required {
            info!(agent_id = %agent_id, harvested, fresh, usable = filtered.kept.len(), required, "Not enough interactions to learn from");
            return CycleOutcome::InsufficientData {
                harvested,
                fresh,
                usable: filtered.kept.len(),
                required,
            };
        }

        if let Some(report) = self.anomaly.inspect(&filtered.kept, now) {
            warn!(agent_id = %agent_id, anomaly = %report, "Coordinated transcript pattern detected; aborting cycle");
            return CycleOutcome::AnomalyBlocked { report };
        }

        let summary = self.analyzer.analyze(window, &filtered.kept, dropped);
        info!(
            agent_id = %agent_id,
            total = summary.total,
            pattern_matches = summary.pattern_matches,
            categories = summary.issues.len(),
            edge_cases = summary.edge_cases.len(),
            "Interactions analyzed"
        );
        *summary_out = Some(summary.clone());

        let profile = match self.fetch_profile(agent_id).await {
            Ok(profile) => profile,
            Err(e) => return e.into(),
        };

        let proposal = match self.synthesizer.synthesize(&summary, &profile.behavior_text).await {
            Ok(proposal) => proposal,
            Err(e) => return CycleError::from(e).into(),
        };
        *proposal_out = Some(proposal.clone());

        let merged_text = match self.validate(&proposal, &profile) {
            Stage::Continue(text) => text,
            Stage::Stop(outcome) => return outcome,
        };

        if self.gate.is_significant(&proposal) {
            let pending = PendingApproval::new(cycle_id, proposal, Some(summary), now);
            let approval_id = pending.id.clone();
            return match self.approvals.submit(pending) {
                Ok(()) => CycleOutcome::ApprovalRequired { approval_id },
                Err(e) => {
                    error!(approval_id = %approval_id, error = %e, "Failed to queue proposal for approval");
                    CycleOutcome::ApprovalQueueFailed {
                        error: format!("{:#}", e),
                    }
                }
            };
        }

        self.apply(cycle_id, &proposal, Some(&summary), &profile, &merged_text, now)
            .await
            .unwrap_or_else(CycleOutcome::from)
    }

    async fn fetch_profile(&self, agent_id: &str) -> Result<AgentProfile, CycleError> {
        self.directory.fetch_profile(agent_id).await.map_err(|source| {
            SyncError::Agent {
                agent_id: agent_id.to_string(),
                source,
            }
            .into()
        })
    }

    /// Safety validation then the core-behavior guard; yields the merged text
    fn validate(&self, proposal: &ImprovementProposal, profile: &AgentProfile) -> Stage<String> {
        if let SafetyVerdict::Fail { violation, excerpt } = self.validator.validate(proposal) {
            return Stage::Stop(CycleOutcome::SafetyBlocked { violation, excerpt });
        }

        let merged_text = proposal.merge_into_behavior(&profile.behavior_text);
        if let SafetyVerdict::Fail { violation, excerpt } =
            self.validator.validate_merged(&profile.behavior_text, &merged_text)
        {
            return Stage::Stop(CycleOutcome::SafetyBlocked { violation, excerpt });
        }
        if let Err(violation) = self.guard.verify(&merged_text) {
            return Stage::Stop(CycleError::from(violation).into());
        }
        Stage::Continue(merged_text)
    }

    /// Synchronize documents, then push the merged behavior text
    async fn apply(
        &self,
        cycle_id: &str,
        proposal: &ImprovementProposal,
        summary: Option<&AnalysisSummary>,
        profile: &AgentProfile,
        merged_text: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, CycleError> {
        let agent_id = self.config.agent.id.as_str();
        let documents = proposal.to_documents(summary, cycle_id, now);

        let report = if documents.is_empty() {
            None
        } else {
            let kb_name = self.config.agent.knowledge_base_name();
            Some(
                self.synchronizer
                    .synchronize(agent_id, &kb_name, &documents, now)
                    .await?,
            )
        };

        let behavior_updated = merged_text != profile.behavior_text;
        if behavior_updated {
            self.directory
                .update_behavior(agent_id, merged_text)
                .await
                .map_err(|source| SyncError::Agent {
                    agent_id: agent_id.to_string(),
                    source,
                })?;
            info!(agent_id = %agent_id, "Behavior text updated");
        }

        Ok(match report {
            Some(report) => CycleOutcome::Applied {
                kb_id: Some(report.kb_id),
                documents_added: report.added.len(),
                documents_superseded: report.superseded.len(),
                total_documents: report.total_documents,
                behavior_updated,
            },
            None => CycleOutcome::Applied {
                kb_id: None,
                documents_added: 0,
                documents_superseded: 0,
                total_documents: 0,
                behavior_updated,
            },
        })
    }

    /// Apply a parked proposal after operator approval
    ///
    /// The proposal is re-validated against the current behavior text. A
    /// proposal that no longer passes is rejected; one whose sync fails stays
    /// pending so it can be approved again.
    pub async fn apply_approved(&self, approval_id: &str, now: DateTime<Utc>) -> Result<CycleReport> {
        let Some(pending) = self.approvals.get(approval_id) else {
            bail!("No approval with id {}", approval_id);
        };
        if !pending.is_pending() {
            bail!("Approval {} is already {}", approval_id, pending.status);
        }

        let agent_id = self.config.agent.id.as_str();
        let cycle_id = pending.cycle_id.clone();
        info!(approval_id = %approval_id, cycle_id = %cycle_id, "Applying approved proposal");

        let outcome: CycleOutcome = match self.fetch_profile(agent_id).await {
            Err(e) => e.into(),
            Ok(profile) => match self.validate(&pending.proposal, &profile) {
                Stage::Stop(outcome) => {
                    if let Err(e) = self
                        .approvals
                        .reject(approval_id, Some(format!("re-validation failed: {}", outcome)), now)
                    {
                        error!(approval_id = %approval_id, error = %e, "Failed to reject approval");
                    }
                    outcome
                }
                Stage::Continue(merged_text) => {
                    let outcome = self
                        .apply(
                            &cycle_id,
                            &pending.proposal,
                            pending.summary.as_ref(),
                            &profile,
                            &merged_text,
                            now,
                        )
                        .await
                        .unwrap_or_else(CycleOutcome::from);
                    if matches!(outcome, CycleOutcome::Applied { .. }) {
                        if let Err(e) = self.approvals.approve(approval_id, now) {
                            error!(approval_id = %approval_id, error = %e, "Applied proposal could not be marked approved");
                        }
                    }
                    outcome
                }
            },
        };

        let report = CycleReport {
            cycle_id,
            window: pending.summary.as_ref().map(|s| s.window),
            summary: pending.summary.clone(),
            outcome,
        };
        self.record(&report, Some(pending.proposal), now)?;
        Ok(report)
    }

    fn record(&self, report: &CycleReport, proposal: Option<ImprovementProposal>, now: DateTime<Utc>) -> Result<()> {
        let outcome = &report.outcome;
        let kb_id = match outcome {
            CycleOutcome::Applied { kb_id, .. } => kb_id.clone(),
            _ => None,
        };

        if outcome.is_fatal() {
            error!(cycle_id = %report.cycle_id, outcome = %outcome, "Learning cycle failed fatally");
        } else if outcome.is_determinate() {
            info!(cycle_id = %report.cycle_id, outcome = outcome.status(), "Learning cycle finished");
        } else {
            warn!(cycle_id = %report.cycle_id, outcome = %outcome, "Learning cycle did not complete");
        }

        self.log.append(&CycleLogEntry {
            timestamp: now,
            cycle_id: report.cycle_id.clone(),
            window: report.window,
            summary_digest: report.summary.as_ref().map(AnalysisSummary::digest),
            proposal,
            kb_id,
            status: outcome.status().to_string(),
            detail: outcome.to_string(),
        })
    }
}
