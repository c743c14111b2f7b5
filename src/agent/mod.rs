//! Agent module - LLM access used by the improvement synthesizer

pub mod llm;

pub use llm::{ChatMessage, OpenRouterClient, ProviderConfig};
