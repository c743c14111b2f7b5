//! Pattern Extractor - classifies interactions into outcomes and issue categories
//!
//! Scans each surviving transcript against an ordered table of category
//! matchers, aggregates matches per category, and pulls a one-line summary out
//! of strongly negative calls. Deterministic and side-effect free.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;
use tracing::debug;

use crate::types::{AnalysisWindow, InteractionRecord, Sentiment};

/// Named issue categories, in matching order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    Reorder,
    DiscountRequest,
    Cancellation,
    Escalation,
    VoicemailSystem,
    DeliveryInquiry,
    DietaryInquiry,
    RefundRequest,
    Complaint,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 9] = [
        IssueCategory::Reorder,
        IssueCategory::DiscountRequest,
        IssueCategory::Cancellation,
        IssueCategory::Escalation,
        IssueCategory::VoicemailSystem,
        IssueCategory::DeliveryInquiry,
        IssueCategory::DietaryInquiry,
        IssueCategory::RefundRequest,
        IssueCategory::Complaint,
    ];

    fn pattern(&self) -> &'static str {
        match self {
            IssueCategory::Reorder => r"(?i)\b(re-?order(ing)?|order\s+again|same\s+(order\s+)?as\s+last\s+time|another\s+box)\b",
            IssueCategory::DiscountRequest => r"(?i)\b(discount|coupon|promo(tion)?(\s+code)?|cheaper|any\s+deals?)\b",
            IssueCategory::Cancellation => r"(?i)\b(cancel(l?ed|l?ing|lation)?|unsubscribe|stop\s+(my\s+)?(subscription|deliveries|plan))\b",
            IssueCategory::Escalation => r"(?i)\b(manager|supervisor|(speak|talk)\s+to\s+(a\s+)?(real\s+)?(human|person|someone))\b",
            IssueCategory::VoicemailSystem => r"(?i)(leave\s+(a|your)\s+message|after\s+the\s+(tone|beep)|voice\s?mail|mailbox\s+is\s+full)",
            IssueCategory::DeliveryInquiry => r"(?i)\b(deliver(y|ed|ies)?|shipping|tracking|where\s+is\s+my\s+order|arriv(e|al|ing))\b",
            IssueCategory::DietaryInquiry => r"(?i)\b(allerg(y|ies|ic)|gluten|vegan|vegetarian|dairy|lactose|nut[-\s]free|keto|ingredients?)\b",
            IssueCategory::RefundRequest => r"(?i)\b(refund(ed)?|money\s+back|charge\s*back|reimburse(ment)?)\b",
            IssueCategory::Complaint => r"(?i)\b(complain(t|ing)?|terrible|awful|unacceptable|disappointed|worst|cold\s+food)\b",
        }
    }

    /// Keywords attached to knowledge documents covering this category
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            IssueCategory::Reorder => &["reorder", "repeat order", "last order"],
            IssueCategory::DiscountRequest => &["discount", "coupon", "promotion"],
            IssueCategory::Cancellation => &["cancel", "subscription", "pause"],
            IssueCategory::Escalation => &["manager", "human", "transfer"],
            IssueCategory::VoicemailSystem => &["voicemail", "message", "callback"],
            IssueCategory::DeliveryInquiry => &["delivery", "tracking", "arrival"],
            IssueCategory::DietaryInquiry => &["allergy", "ingredients", "dietary"],
            IssueCategory::RefundRequest => &["refund", "credit", "billing"],
            IssueCategory::Complaint => &["complaint", "apology", "quality"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Reorder => "reorder",
            IssueCategory::DiscountRequest => "discount-request",
            IssueCategory::Cancellation => "cancellation",
            IssueCategory::Escalation => "escalation",
            IssueCategory::VoicemailSystem => "voicemail-system",
            IssueCategory::DeliveryInquiry => "delivery-inquiry",
            IssueCategory::DietaryInquiry => "dietary-inquiry",
            IssueCategory::RefundRequest => "refund-request",
            IssueCategory::Complaint => "complaint",
        }
    }

    /// Category whose matcher fires most often in `text`
    pub fn best_match(text: &str) -> Option<IssueCategory> {
        CATEGORY_TABLE
            .iter()
            .map(|(cat, regex)| (*cat, regex.find_iter(text).count()))
            .filter(|(_, hits)| *hits > 0)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(cat, _)| cat)
    }
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static CATEGORY_TABLE: LazyLock<Vec<(IssueCategory, Regex)>> = LazyLock::new(|| {
    IssueCategory::ALL
        .iter()
        .map(|cat| (*cat, Regex::new(cat.pattern()).expect("category pattern must compile")))
        .collect()
});

static PROBLEM_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(problem|wrong|not|issue|broken|missing|late|never|didn'?t|can'?t|won'?t)\b")
        .expect("problem-token pattern must compile")
});

const DEFAULT_EDGE_CASE_SUMMARY: &str = "Negative interaction without a stated problem";
const EXCERPT_CHARS: usize = 160;
const SUMMARY_CHARS: usize = 120;

/// One category hit in one interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub category: IssueCategory,
    pub interaction_id: String,
    pub excerpt: String,
    pub sentiment: Sentiment,
}

/// Per-category aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueAggregate {
    pub count: usize,
    pub examples: Vec<String>,
}

/// A strongly negative call worth calling out individually
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCase {
    pub interaction_id: String,
    pub summary: String,
    pub sentiment: Sentiment,
    pub preferred_resolution: Option<String>,
}

/// Everything the synthesizer learns about a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub window: AnalysisWindow,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub voicemail: usize,
    /// Records removed by the adversarial filter before analysis
    pub filtered_out: usize,
    /// Total category hits across all interactions
    pub pattern_matches: usize,
    pub issues: BTreeMap<IssueCategory, IssueAggregate>,
    /// Matches from calls the agent did not resolve
    pub unhandled: Vec<PatternMatch>,
    pub edge_cases: Vec<EdgeCase>,
}

impl AnalysisSummary {
    /// SHA-256 of the canonical JSON form
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Observed count for a category
    pub fn count_for(&self, category: IssueCategory) -> usize {
        self.issues.get(&category).map(|a| a.count).unwrap_or(0)
    }

    /// Plain-text rendering sent to the synthesizer
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Analysis window: {}", self.window);
        let _ = writeln!(
            out,
            "Interactions: {} total, {} successful, {} failed, {} voicemail ({} removed as adversarial)",
            self.total, self.successful, self.failed, self.voicemail, self.filtered_out
        );

        if !self.issues.is_empty() {
            let _ = writeln!(out, "\nIssue categories:");
            for (category, aggregate) in &self.issues {
                let _ = writeln!(
                    out,
                    "- {}: {} occurrences (examples: {})",
                    category,
                    aggregate.count,
                    aggregate.examples.join(", ")
                );
            }
        }

        if !self.unhandled.is_empty() {
            let _ = writeln!(out, "\nUnhandled patterns:");
            for m in self.unhandled.iter().take(20) {
                let _ = writeln!(out, "- [{}] {} ({}): {}", m.category, m.interaction_id, m.sentiment, m.excerpt);
            }
            if self.unhandled.len() > 20 {
                let _ = writeln!(out, "- ... {} more", self.unhandled.len() - 20);
            }
        }

        if !self.edge_cases.is_empty() {
            let _ = writeln!(out, "\nEdge cases:");
            for edge in &self.edge_cases {
                let resolution = edge.preferred_resolution.as_deref().unwrap_or("unknown");
                let _ = writeln!(
                    out,
                    "- {}: {} (preferred resolution: {})",
                    edge.interaction_id, edge.summary, resolution
                );
            }
        }

        out
    }
}

/// Turns interactions into an analysis summary
pub trait TranscriptAnalyzer: Send + Sync {
    fn analyze(
        &self,
        window: AnalysisWindow,
        records: &[InteractionRecord],
        filtered_out: usize,
    ) -> AnalysisSummary;
}

/// Regex-table implementation of [`TranscriptAnalyzer`]
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    max_examples: usize,
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl PatternExtractor {
    pub fn new(max_examples: usize) -> Self {
        Self { max_examples }
    }

    /// All category hits in a single record
    pub fn scan(&self, record: &InteractionRecord) -> Vec<PatternMatch> {
        CATEGORY_TABLE
            .iter()
            .filter_map(|(category, regex)| {
                regex.find(&record.transcript).map(|m| PatternMatch {
                    category: *category,
                    interaction_id: record.id.clone(),
                    excerpt: excerpt_around(&record.transcript, m.start()),
                    sentiment: record.outcome.sentiment,
                })
            })
            .collect()
    }

    /// Edge case for a strongly negative record
    pub fn edge_case(&self, record: &InteractionRecord) -> Option<EdgeCase> {
        if !record.outcome.sentiment.is_strongly_negative() {
            return None;
        }

        let summary = record
            .transcript
            .lines()
            .map(str::trim)
            .find(|line| PROBLEM_TOKENS.is_match(line))
            .map(|line| crate::truncate_safe(line, SUMMARY_CHARS).to_string())
            .unwrap_or_else(|| DEFAULT_EDGE_CASE_SUMMARY.to_string());

        let preferred_resolution = record
            .custom_str("preferred_resolution")
            .or_else(|| record.custom_str("resolution"))
            .map(str::to_string);

        Some(EdgeCase {
            interaction_id: record.id.clone(),
            summary,
            sentiment: record.outcome.sentiment,
            preferred_resolution,
        })
    }
}

impl TranscriptAnalyzer for PatternExtractor {
    fn analyze(
        &self,
        window: AnalysisWindow,
        records: &[InteractionRecord],
        filtered_out: usize,
    ) -> AnalysisSummary {
        let mut summary = AnalysisSummary {
            window,
            total: records.len(),
            successful: 0,
            failed: 0,
            voicemail: 0,
            filtered_out,
            pattern_matches: 0,
            issues: BTreeMap::new(),
            unhandled: Vec::new(),
            edge_cases: Vec::new(),
        };

        for record in records {
            let unresolved = if record.outcome.in_voicemail {
                summary.voicemail += 1;
                false
            } else if record.outcome.successful {
                summary.successful += 1;
                false
            } else {
                summary.failed += 1;
                true
            };

            for hit in self.scan(record) {
                summary.pattern_matches += 1;
                let aggregate = summary.issues.entry(hit.category).or_default();
                aggregate.count += 1;
                if aggregate.examples.len() < self.max_examples
                    && !aggregate.examples.contains(&hit.interaction_id)
                {
                    aggregate.examples.push(hit.interaction_id.clone());
                }
                if unresolved {
                    summary.unhandled.push(hit);
                }
            }

            if let Some(edge) = self.edge_case(record) {
                summary.edge_cases.push(edge);
            }
        }

        debug!(
            total = summary.total,
            matches = summary.pattern_matches,
            categories = summary.issues.len(),
            edge_cases = summary.edge_cases.len(),
            "Pattern extraction complete"
        );

        summary
    }
}

/// The transcript line containing byte offset `at`, truncated
fn excerpt_around(transcript: &str, at: usize) -> String {
    let line_start = transcript[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = transcript[at..].find('\n').map(|i| at + i).unwrap_or(transcript.len());
    crate::truncate_safe(transcript[line_start..line_end].trim(), EXCERPT_CHARS).to_string()
}
