//! Improvement Synthesizer - turns an analysis summary into a candidate proposal
//!
//! The remote model is opaque. Its output is parsed strictly; anything that is
//! not a proposal object fails the cycle.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::error::SynthesisError;
use super::extractor::AnalysisSummary;
use super::proposal::ImprovementProposal;
use crate::agent::llm::{ChatMessage, OpenRouterClient};

const SYSTEM_PROMPT: &str = r#"You improve the instructions of a voice customer-service agent.
You receive an analysis of recent calls and the agent's current instructions.
Answer with a single JSON object and nothing else:
{
  "newSections": { "<section name>": "<instructions for a situation the agent does not cover yet>" },
  "modifications": { "<exact text in the current instructions>": "<replacement>" },
  "priorityFixes": ["<most important fix first>"],
  "expectedImprovement": "<one sentence>"
}
Only add a section for a genuinely new situation. Keep the agent's name, brand, and escalation rules intact.
Every new section must describe how the agent helps or assists the caller."#;

/// Produces improvement proposals
#[async_trait]
pub trait ImprovementSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        summary: &AnalysisSummary,
        behavior_text: &str,
    ) -> Result<ImprovementProposal, SynthesisError>;
}

/// LLM-backed synthesizer
pub struct LlmSynthesizer {
    client: OpenRouterClient,
    model: String,
    max_tokens: u32,
}

impl LlmSynthesizer {
    pub fn new(client: OpenRouterClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 2048,
        }
    }

    fn messages(summary: &AnalysisSummary, behavior_text: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "## Call analysis\n{}\n## Current instructions\n{}",
                summary.to_prompt_text(),
                behavior_text
            )),
        ]
    }
}

#[async_trait]
impl ImprovementSynthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        summary: &AnalysisSummary,
        behavior_text: &str,
    ) -> Result<ImprovementProposal, SynthesisError> {
        let messages = Self::messages(summary, behavior_text);
        let response = self
            .client
            .complete(&self.model, &messages, Some(self.max_tokens))
            .await
            .map_err(SynthesisError::Service)?;

        debug!(chars = response.len(), "Synthesizer responded");
        let proposal = parse_proposal(&response)?;
        info!(
            new_sections = proposal.new_sections.len(),
            modifications = proposal.modifications.len(),
            priority_fixes = proposal.priority_fixes.len(),
            "Proposal synthesized"
        );
        Ok(proposal)
    }
}

/// Parse a model response into a proposal
///
/// Markdown code fences around the object are tolerated; prose is not.
pub fn parse_proposal(response: &str) -> Result<ImprovementProposal, SynthesisError> {
    let trimmed = strip_code_fence(response.trim());
    if trimmed.is_empty() {
        return Err(SynthesisError::Empty);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| SynthesisError::Malformed {
        reason: e.to_string(),
        excerpt: crate::truncate_safe(trimmed, 200).to_string(),
    })?;

    if !value.is_object() {
        return Err(SynthesisError::Malformed {
            reason: "expected a JSON object".to_string(),
            excerpt: crate::truncate_safe(trimmed, 200).to_string(),
        });
    }

    serde_json::from_value(value).map_err(|e| SynthesisError::Malformed {
        reason: e.to_string(),
        excerpt: crate::truncate_safe(trimmed, 200).to_string(),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening fence
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
