//! In-memory collaborators for driving whole learning cycles

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use call_learner::learning::extractor::{AnalysisSummary, PatternExtractor, TranscriptAnalyzer};
use call_learner::learning::harvester::{HarvestQuery, InteractionSource};
use call_learner::learning::knowledge::{
    AgentDirectory, AgentProfile, DocumentMetadata, KnowledgeBase, KnowledgeBaseSummary, KnowledgeDocument,
    KnowledgeStore,
};
use call_learner::learning::synthesizer::ImprovementSynthesizer;
use call_learner::learning::{CycleServices, ImprovementProposal, LearningCycle, SynthesisError};
use call_learner::scheduler::{Clock, LearningScheduler, ManualClock};
use call_learner::types::{AnalysisWindow, Direction, InteractionRecord, OutcomeFlags};
use call_learner::Config;

pub const AGENT_ID: &str = "agent_1";
pub const KB_NAME: &str = "Riley - Learned Knowledge";
pub const BEHAVIOR: &str = "You are Riley, the phone assistant for Harvest Table.\n\
Greet callers warmly and keep answers short.\n\
If a caller asks for a person, say transfer_to_human.";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

pub fn record(id: &str, transcript: &str, at: DateTime<Utc>) -> InteractionRecord {
    InteractionRecord {
        id: id.to_string(),
        transcript: transcript.to_string(),
        outcome: OutcomeFlags::default(),
        custom_fields: Default::default(),
        timestamp: at,
        direction: Direction::Inbound,
    }
}

/// Calls that match no issue category, one per hour going back from 2h ago
pub fn routine_calls(count: usize, at: DateTime<Utc>) -> Vec<InteractionRecord> {
    (0..count)
        .map(|i| {
            record(
                &format!("routine-{}", i),
                &format!(
                    "User: Hi, caller {} here, just confirming my account details.\nAgent: All set, thanks for calling.",
                    i
                ),
                at - Duration::hours(2 + i as i64),
            )
        })
        .collect()
}

/// Eight calls hitting three categories: three delivery, three dietary, two refund
pub fn issue_calls(at: DateTime<Utc>) -> Vec<InteractionRecord> {
    let transcripts = [
        "User: Where is my order? It should arrive today.",
        "User: Where is my order? The app says it should arrive by noon.",
        "User: Where is my order? Nothing has shown up yet.",
        "User: Does the lasagna contain gluten? I have an allergy.",
        "User: Is the curry vegan?",
        "User: Can you list the ingredients of the soup?",
        "User: I would like my money back for yesterday.",
        "User: Please give me a refund for the missing salad.",
    ];
    transcripts
        .iter()
        .enumerate()
        .map(|(i, t)| record(&format!("issue-{}", i), t, at - Duration::hours(3 + 2 * i as i64)))
        .collect()
}

pub fn document(title: &str, body: &str, first_seen: DateTime<Utc>, frequency: u32) -> KnowledgeDocument {
    KnowledgeDocument {
        title: title.to_string(),
        body: body.to_string(),
        metadata: DocumentMetadata {
            issue_type: "general".to_string(),
            keywords: vec![],
            first_seen,
            frequency,
            origin_cycle: "seed".to_string(),
        },
    }
}

pub fn seed_documents() -> Vec<KnowledgeDocument> {
    let seen = now() - Duration::days(20);
    vec![
        document("Opening hours", "Kitchen hours are 9am to 9pm.", seen, 3),
        document("Reorders", "Offer to repeat the caller's last order.", seen, 5),
        document("Allergy questions", "Read the allergen list from the menu card.", seen, 2),
        document("Cancellations", "Help callers pause instead of cancel when they ask.", seen, 1),
    ]
}

pub fn section_proposal(sections: &[(&str, &str)], fixes: &[&str]) -> ImprovementProposal {
    let mut proposal = ImprovementProposal::default();
    for (name, content) in sections {
        proposal.new_sections.insert(name.to_string(), content.to_string());
    }
    proposal.priority_fixes = fixes.iter().map(|f| f.to_string()).collect();
    proposal.expected_improvement = "Fewer repeat calls about the same problem.".to_string();
    proposal
}

pub fn delivery_proposal() -> ImprovementProposal {
    section_proposal(
        &[(
            "Delivery status questions",
            "Help callers find their tracking link and give the expected arrival window.",
        )],
        &["Confirm the delivery address before ending the call."],
    )
}

/// Whole-resource store kept in memory
#[derive(Default)]
pub struct FakeStore {
    bases: Mutex<BTreeMap<String, KnowledgeBase>>,
    next_id: AtomicUsize,
    pub fail_create: AtomicBool,
    pub creates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FakeStore {
    fn allocate(&self) -> (String, DateTime<Utc>) {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        (format!("kb_{}", n), now() - Duration::days(30) + Duration::minutes(n as i64))
    }

    pub fn seed(&self, name: &str, documents: Vec<KnowledgeDocument>) -> String {
        let (id, created_at) = self.allocate();
        self.bases.lock().unwrap().insert(
            id.clone(),
            KnowledgeBase {
                id: id.clone(),
                name: name.to_string(),
                documents,
                agent_id: Some(AGENT_ID.to_string()),
                created_at: Some(created_at),
            },
        );
        id
    }

    pub fn bases(&self) -> Vec<KnowledgeBase> {
        self.bases.lock().unwrap().values().cloned().collect()
    }

    pub fn named(&self, name: &str) -> Vec<KnowledgeBase> {
        self.bases().into_iter().filter(|kb| kb.name == name).collect()
    }
}

#[async_trait]
impl KnowledgeStore for FakeStore {
    async fn list(&self) -> Result<Vec<KnowledgeBaseSummary>> {
        Ok(self
            .bases
            .lock()
            .unwrap()
            .values()
            .map(|kb| KnowledgeBaseSummary {
                id: kb.id.clone(),
                name: kb.name.clone(),
                created_at: kb.created_at,
            })
            .collect())
    }

    async fn create(&self, name: &str, documents: &[KnowledgeDocument]) -> Result<KnowledgeBaseSummary> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("500 Internal Server Error"));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = self.seed(name, documents.to_vec());
        let created_at = self.bases.lock().unwrap().get(&id).and_then(|kb| kb.created_at);
        Ok(KnowledgeBaseSummary {
            id,
            name: name.to_string(),
            created_at,
        })
    }

    async fn retrieve(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self.bases.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match self.bases.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(anyhow!("404 Not Found: {}", id)),
        }
    }
}

/// Agent configuration service kept in memory
pub struct FakeDirectory {
    profile: Mutex<AgentProfile>,
    pub behavior_updates: AtomicUsize,
}

impl FakeDirectory {
    pub fn new(knowledge_base_ids: Vec<String>) -> Self {
        Self {
            profile: Mutex::new(AgentProfile {
                agent_id: AGENT_ID.to_string(),
                name: "Riley".to_string(),
                behavior_text: BEHAVIOR.to_string(),
                knowledge_base_ids,
            }),
            behavior_updates: AtomicUsize::new(0),
        }
    }

    pub fn profile(&self) -> AgentProfile {
        self.profile.lock().unwrap().clone()
    }

    pub fn link(&self, ids: Vec<String>) {
        self.profile.lock().unwrap().knowledge_base_ids = ids;
    }
}

#[async_trait]
impl AgentDirectory for FakeDirectory {
    async fn fetch_profile(&self, _agent_id: &str) -> Result<AgentProfile> {
        Ok(self.profile())
    }

    async fn update_behavior(&self, _agent_id: &str, behavior_text: &str) -> Result<()> {
        self.behavior_updates.fetch_add(1, Ordering::SeqCst);
        self.profile.lock().unwrap().behavior_text = behavior_text.to_string();
        Ok(())
    }

    async fn set_knowledge_bases(&self, _agent_id: &str, knowledge_base_ids: &[String]) -> Result<()> {
        self.profile.lock().unwrap().knowledge_base_ids = knowledge_base_ids.to_vec();
        Ok(())
    }
}

/// Call platform returning a fixed set of records
#[derive(Default)]
pub struct FakeSource {
    records: Mutex<Vec<InteractionRecord>>,
}

impl FakeSource {
    pub fn set(&self, records: Vec<InteractionRecord>) {
        *self.records.lock().unwrap() = records;
    }
}

#[async_trait]
impl InteractionSource for FakeSource {
    async fn fetch(&self, _query: &HarvestQuery) -> Result<Vec<InteractionRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }
}

/// Synthesizer that always proposes the same change
pub struct FixedSynthesizer {
    proposal: Mutex<ImprovementProposal>,
    pub calls: AtomicUsize,
}

impl FixedSynthesizer {
    pub fn new(proposal: ImprovementProposal) -> Self {
        Self {
            proposal: Mutex::new(proposal),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, proposal: ImprovementProposal) {
        *self.proposal.lock().unwrap() = proposal;
    }
}

#[async_trait]
impl ImprovementSynthesizer for FixedSynthesizer {
    async fn synthesize(
        &self,
        _summary: &AnalysisSummary,
        _behavior_text: &str,
    ) -> Result<ImprovementProposal, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.proposal.lock().unwrap().clone())
    }
}

/// Pattern extractor that counts how often it runs
#[derive(Default)]
pub struct CountingAnalyzer {
    inner: PatternExtractor,
    pub calls: AtomicUsize,
}

impl TranscriptAnalyzer for CountingAnalyzer {
    fn analyze(&self, window: AnalysisWindow, records: &[InteractionRecord], filtered_out: usize) -> AnalysisSummary {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.analyze(window, records, filtered_out)
    }
}

/// Everything a cycle talks to, plus a temp data directory
pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<Config>,
    pub store: Arc<FakeStore>,
    pub directory: Arc<FakeDirectory>,
    pub source: Arc<FakeSource>,
    pub synthesizer: Arc<FixedSynthesizer>,
    pub analyzer: Arc<CountingAnalyzer>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Store seeded with one learned knowledge base linked to the agent
    pub fn seeded() -> Self {
        let store = FakeStore::default();
        let kb_id = store.seed(KB_NAME, seed_documents());
        Self::with_store(store, vec![kb_id, "kb_menu".to_string()])
    }

    pub fn with_store(store: FakeStore, linked: Vec<String>) -> Self {
        let mut config = Config::default();
        config.agent.id = AGENT_ID.to_string();
        config.agent.name = "Riley".to_string();

        Self {
            dir: tempfile::tempdir().unwrap(),
            config: Arc::new(config),
            store: Arc::new(store),
            directory: Arc::new(FakeDirectory::new(linked)),
            source: Arc::new(FakeSource::default()),
            synthesizer: Arc::new(FixedSynthesizer::new(delivery_proposal())),
            analyzer: Arc::new(CountingAnalyzer::default()),
            clock: Arc::new(ManualClock::new(now())),
        }
    }

    pub fn cycle(&self) -> LearningCycle {
        let services = CycleServices {
            source: self.source.clone(),
            analyzer: self.analyzer.clone(),
            synthesizer: self.synthesizer.clone(),
            store: self.store.clone(),
            directory: self.directory.clone(),
        };
        LearningCycle::new(self.config.clone(), services, self.dir.path())
    }

    pub fn scheduler(&self) -> LearningScheduler {
        let clock: Arc<dyn Clock> = self.clock.clone();
        LearningScheduler::new(self.cycle(), &self.config, clock, self.dir.path()).unwrap()
    }

    /// Total documents across every knowledge base with the learned name
    pub fn learned_count(&self) -> usize {
        self.store.named(KB_NAME).iter().map(|kb| kb.documents.len()).sum()
    }
}
