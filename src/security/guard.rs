//! Core-behavior guard
//!
//! Identity and hard safety tokens must survive any automated edit of the
//! agent's behavior text. A merge that drops one is never shipped.

use thiserror::Error;
use tracing::error;

use crate::config::IdentityConfig;

/// A merge removed mandatory text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("merged behavior text is missing core tokens: {}", missing.join(", "))]
pub struct CoreBehaviorViolation {
    pub missing: Vec<String>,
}

/// Verifies mandatory tokens are present
#[derive(Debug, Clone)]
pub struct CoreBehaviorGuard {
    tokens: Vec<String>,
}

impl CoreBehaviorGuard {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    pub fn from_identity(identity: &IdentityConfig) -> Self {
        Self::new(identity.core_tokens())
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Tokens absent from `text`
    pub fn missing(&self, text: &str) -> Vec<String> {
        self.tokens
            .iter()
            .filter(|token| !text.contains(token.as_str()))
            .cloned()
            .collect()
    }

    /// Check merged behavior text
    pub fn verify(&self, merged: &str) -> Result<(), CoreBehaviorViolation> {
        let missing = self.missing(merged);
        if missing.is_empty() {
            return Ok(());
        }

        error!(missing = ?missing, "Merged behavior text dropped core tokens; discarding merge");
        Err(CoreBehaviorViolation { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> CoreBehaviorGuard {
        CoreBehaviorGuard::from_identity(&IdentityConfig::default())
    }

    #[test]
    fn test_all_tokens_present() {
        let text = "You are Riley, the Harvest Table assistant. Use transfer_to_human for escalations.";
        assert!(guard().verify(text).is_ok());
    }

    #[test]
    fn test_missing_token_is_reported() {
        let text = "You are a helpful assistant for Harvest Table. Use transfer_to_human when needed.";
        let err = guard().verify(text).unwrap_err();
        assert_eq!(err.missing, vec!["Riley".to_string()]);
        assert!(err.to_string().contains("Riley"));
    }

    #[test]
    fn test_tokens_are_case_sensitive_substrings() {
        let text = "riley from harvest table, transfer_to_human";
        assert_eq!(guard().missing(text).len(), 2);
    }
}
