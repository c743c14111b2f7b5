//! Safety validation for improvement proposals
//!
//! Fail-closed: any matcher firing rejects the whole proposal, and a rejected
//! proposal never reaches the merge step.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use super::prompt::{detect_forbidden, has_positive_intent, ForbiddenCategory};
use crate::learning::proposal::ImprovementProposal;

/// Why a proposal was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "category", rename_all = "snake_case")]
pub enum Violation {
    Forbidden(ForbiddenCategory),
    /// New sections without any customer-serving intent; a soft failure
    MissingPositiveIntent,
}

impl Violation {
    pub fn is_soft(&self) -> bool {
        matches!(self, Violation::MissingPositiveIntent)
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Forbidden(category) => write!(f, "{}", category),
            Violation::MissingPositiveIntent => write!(f, "new sections lack positive intent"),
        }
    }
}

/// Outcome of validating one proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SafetyVerdict {
    Pass,
    Fail { violation: Violation, excerpt: String },
}

impl SafetyVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, SafetyVerdict::Pass)
    }
}

/// Validates proposals against the forbidden-category table
#[derive(Debug, Clone, Default)]
pub struct SafetyValidator;

impl SafetyValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a proposal
    pub fn validate(&self, proposal: &ImprovementProposal) -> SafetyVerdict {
        let verdict = self.validate_text(&proposal.to_text());
        if !verdict.passed() {
            return verdict;
        }

        if !proposal.new_sections.is_empty() && !has_positive_intent(&proposal.new_section_text()) {
            let verdict = SafetyVerdict::Fail {
                violation: Violation::MissingPositiveIntent,
                excerpt: crate::truncate_safe(&proposal.new_section_text(), 80).to_string(),
            };
            warn!(verdict = ?verdict, "Proposal rejected by safety validator");
            return verdict;
        }

        SafetyVerdict::Pass
    }

    /// Validate the lines a merge adds to the behavior text
    ///
    /// Modifications splice replacements into existing sentences, so the
    /// merged result can read differently from either half on its own.
    pub fn validate_merged(&self, current: &str, merged: &str) -> SafetyVerdict {
        let existing: HashSet<&str> = current.lines().map(str::trim).collect();
        let added = merged
            .lines()
            .filter(|line| !existing.contains(line.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        self.validate_text(&added)
    }

    /// Validate arbitrary text
    pub fn validate_text(&self, text: &str) -> SafetyVerdict {
        match detect_forbidden(text) {
            Some((category, excerpt)) => {
                warn!(category = %category, excerpt = %excerpt, "Forbidden content detected");
                SafetyVerdict::Fail {
                    violation: Violation::Forbidden(category),
                    excerpt,
                }
            }
            None => SafetyVerdict::Pass,
        }
    }
}
