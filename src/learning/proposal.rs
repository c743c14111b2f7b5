//! Improvement proposals
//!
//! A proposal comes back from the synthesizer and is opaque beyond its shape.
//! This module renders it as plain text for validation, merges it into the
//! agent's behavior text, and turns its new sections into knowledge documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::extractor::{AnalysisSummary, IssueCategory};
use super::knowledge::{DocumentMetadata, KnowledgeDocument};

const ADJUSTMENTS_HEADING: &str = "Adjustments";
const PRIORITY_FIXES_HEADING: &str = "Priority Fixes";
const GENERAL_ISSUE_TYPE: &str = "general";

/// Candidate behavior change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementProposal {
    /// Section name to section content
    #[serde(default, alias = "new_sections")]
    pub new_sections: BTreeMap<String, String>,
    /// Target text to replacement instruction
    #[serde(default)]
    pub modifications: BTreeMap<String, String>,
    #[serde(default, alias = "priority_fixes")]
    pub priority_fixes: Vec<String>,
    #[serde(default, alias = "expected_improvement")]
    pub expected_improvement: String,
}

impl ImprovementProposal {
    pub fn is_empty(&self) -> bool {
        self.new_sections.is_empty() && self.modifications.is_empty() && self.priority_fixes.is_empty()
    }

    /// Every field as plain text, one item per line
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        for (name, content) in &self.new_sections {
            lines.push(name.clone());
            lines.push(content.clone());
        }
        for (target, replacement) in &self.modifications {
            lines.push(target.clone());
            lines.push(replacement.clone());
        }
        lines.extend(self.priority_fixes.iter().cloned());
        lines.push(self.expected_improvement.clone());
        lines.join("\n")
    }

    /// Concatenated content of the new sections
    pub fn new_section_text(&self) -> String {
        self.new_sections
            .iter()
            .map(|(name, content)| format!("{}\n{}", name, content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Apply the proposal to the current behavior text
    ///
    /// Modifications whose target appears verbatim are replaced in place; the
    /// rest are listed under an adjustments block. New sections become `##`
    /// blocks, replacing a block with the same heading.
    pub fn merge_into_behavior(&self, current: &str) -> String {
        let mut text = current.to_string();
        let mut unmatched = Vec::new();

        for (target, replacement) in &self.modifications {
            if !target.is_empty() && text.contains(target.as_str()) {
                text = text.replace(target.as_str(), replacement);
            } else {
                unmatched.push(format!("- {}: {}", target, replacement));
            }
        }

        for (name, content) in &self.new_sections {
            text = upsert_section(&text, name, content.trim());
        }

        if !unmatched.is_empty() {
            text = upsert_section(&text, ADJUSTMENTS_HEADING, &unmatched.join("\n"));
        }

        if !self.priority_fixes.is_empty() {
            let numbered = self
                .priority_fixes
                .iter()
                .enumerate()
                .map(|(i, fix)| format!("{}. {}", i + 1, fix))
                .collect::<Vec<_>>()
                .join("\n");
            text = upsert_section(&text, PRIORITY_FIXES_HEADING, &numbered);
        }

        text
    }

    /// One knowledge document per new section
    pub fn to_documents(
        &self,
        summary: Option<&AnalysisSummary>,
        cycle_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<KnowledgeDocument> {
        self.new_sections
            .iter()
            .map(|(name, content)| {
                let category = IssueCategory::best_match(&format!("{}\n{}", name, content));
                let frequency = match (category, summary) {
                    (Some(cat), Some(summary)) => summary.count_for(cat).max(1) as u32,
                    _ => 1,
                };

                KnowledgeDocument {
                    title: name.trim().to_string(),
                    body: content.trim().to_string(),
                    metadata: DocumentMetadata {
                        issue_type: category
                            .map(|c| c.as_str().to_string())
                            .unwrap_or_else(|| GENERAL_ISSUE_TYPE.to_string()),
                        keywords: keywords_for(name, category),
                        first_seen: now,
                        frequency,
                        origin_cycle: cycle_id.to_string(),
                    },
                }
            })
            .collect()
    }
}

fn keywords_for(title: &str, category: Option<IssueCategory>) -> Vec<String> {
    let mut keywords: Vec<String> = category
        .map(|c| c.keywords().iter().map(|k| k.to_string()).collect())
        .unwrap_or_default();

    for word in title.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() > 3 && !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}

/// Insert or replace a `## heading` block
fn upsert_section(text: &str, heading: &str, body: &str) -> String {
    let marker = format!("## {}", heading.trim());
    let lines: Vec<&str> = text.lines().collect();

    let start = lines.iter().position(|line| line.trim() == marker);
    let Some(start) = start else {
        let mut out = text.trim_end().to_string();
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&marker);
        out.push('\n');
        out.push_str(body);
        out.push('\n');
        return out;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|line| line.starts_with("## "))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let mut out: Vec<String> = lines[..start].iter().map(|l| l.to_string()).collect();
    out.push(marker);
    out.extend(body.lines().map(str::to_string));
    if end < lines.len() {
        out.push(String::new());
        out.extend(lines[end..].iter().map(|l| l.to_string()));
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEHAVIOR: &str = "You are Riley from Harvest Table.\nAlways use transfer_to_human when a caller asks for a person.\n\n## Tone\nWarm and brief.\n";

    fn proposal() -> ImprovementProposal {
        let mut p = ImprovementProposal::default();
        p.new_sections.insert(
            "Dietary Questions".into(),
            "Help callers with allergy questions by reading the ingredients list.".into(),
        );
        p
    }

    #[test]
    fn test_deserialize_camel_and_snake_case() {
        let camel: ImprovementProposal = serde_json::from_str(
            r#"{"newSections": {"A": "help"}, "priorityFixes": ["x"], "expectedImprovement": "more"}"#,
        )
        .unwrap();
        let snake: ImprovementProposal = serde_json::from_str(
            r#"{"new_sections": {"A": "help"}, "priority_fixes": ["x"], "expected_improvement": "more"}"#,
        )
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.new_sections.len(), 1);
    }

    #[test]
    fn test_merge_appends_new_section() {
        let merged = proposal().merge_into_behavior(BEHAVIOR);
        assert!(merged.starts_with("You are Riley from Harvest Table."));
        assert!(merged.contains("## Tone\nWarm and brief."));
        assert!(merged.contains("## Dietary Questions\nHelp callers with allergy questions"));
    }

    #[test]
    fn test_merge_replaces_existing_section() {
        let mut p = ImprovementProposal::default();
        p.new_sections.insert("Tone".into(), "Warm, brief, and patient.".into());
        let merged = p.merge_into_behavior(BEHAVIOR);
        assert!(merged.contains("## Tone\nWarm, brief, and patient."));
        assert!(!merged.contains("Warm and brief."));
        assert_eq!(merged.matches("## Tone").count(), 1);
    }

    #[test]
    fn test_modifications_replace_or_list() {
        let mut p = ImprovementProposal::default();
        p.modifications.insert("Warm and brief.".into(), "Warm and concise.".into());
        p.modifications.insert("Greeting".into(), "Mention the weekly menu".into());
        let merged = p.merge_into_behavior(BEHAVIOR);
        assert!(merged.contains("Warm and concise."));
        assert!(merged.contains("## Adjustments\n- Greeting: Mention the weekly menu"));
    }

    #[test]
    fn test_modification_can_erase_identity() {
        let mut p = ImprovementProposal::default();
        p.modifications.insert("Riley from Harvest Table".into(), "a helpful assistant".into());
        let merged = p.merge_into_behavior(BEHAVIOR);
        assert!(!merged.contains("Harvest Table"));
    }

    #[test]
    fn test_priority_fixes_numbered() {
        let mut p = ImprovementProposal::default();
        p.priority_fixes = vec!["Confirm the address".into(), "Repeat the order".into()];
        let merged = p.merge_into_behavior(BEHAVIOR);
        assert!(merged.contains("## Priority Fixes\n1. Confirm the address\n2. Repeat the order"));
    }

    #[test]
    fn test_to_documents() {
        let now = Utc::now();
        let docs = proposal().to_documents(None, "cycle-1", now);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Dietary Questions");
        assert_eq!(docs[0].metadata.issue_type, "dietary-inquiry");
        assert!(docs[0].metadata.keywords.contains(&"allergy".to_string()));
        assert!(docs[0].metadata.keywords.contains(&"dietary".to_string()));
        assert_eq!(docs[0].metadata.origin_cycle, "cycle-1");
        assert_eq!(docs[0].metadata.first_seen, now);
    }

    #[test]
    fn test_to_text_contains_everything() {
        let mut p = proposal();
        p.priority_fixes.push("Confirm allergies twice".into());
        p.expected_improvement = "Fewer failed calls".into();
        let text = p.to_text();
        assert!(text.contains("Dietary Questions"));
        assert!(text.contains("Confirm allergies twice"));
        assert!(text.contains("Fewer failed calls"));
    }
}
