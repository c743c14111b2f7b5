//! Configuration management
//!
//! Every threshold the learning pipeline uses lives here. The configuration is
//! loaded once at process start and handed to each component; nothing mutates
//! it afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// The agent whose calls are mined
    #[serde(default)]
    pub agent: AgentConfig,
    /// Learning thresholds
    #[serde(default)]
    pub learning: LearningConfig,
    /// Mandatory identity text
    #[serde(default)]
    pub identity: IdentityConfig,
    /// External service endpoints
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Cycle schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Override for the data directory (state files, logs, approvals)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier on the call platform
    #[serde(default = "default_agent_id")]
    pub id: String,
    /// Human-readable agent name, also used to derive the knowledge base name
    #[serde(default = "default_agent_name")]
    pub name: String,
}

fn default_agent_id() -> String {
    "agent-default".to_string()
}

fn default_agent_name() -> String {
    "Riley".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            name: default_agent_name(),
        }
    }
}

impl AgentConfig {
    /// Deterministic name of the knowledge base that holds this agent's learnings
    pub fn knowledge_base_name(&self) -> String {
        format!("{} - Learned Knowledge", self.name.trim())
    }
}

/// Thresholds for every stage of a learning cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Shortest window a cycle analyses, even right after a previous run
    #[serde(default = "default_min_lookback_hours")]
    pub min_lookback_hours: u32,
    /// Longest window a cycle analyses
    #[serde(default = "default_max_lookback_hours")]
    pub max_lookback_hours: u32,
    /// Fewer surviving interactions than this ends the cycle as insufficient data
    #[serde(default = "default_min_interactions")]
    pub min_interactions: usize,
    /// Maximum records requested from the call platform
    #[serde(default = "default_harvest_limit")]
    pub harvest_limit: usize,
    /// Profanity tokens above this count drop a transcript
    #[serde(default = "default_profanity_threshold")]
    pub profanity_threshold: usize,
    /// Rolling window the anomaly detector inspects
    #[serde(default = "default_anomaly_window_minutes")]
    pub anomaly_window_minutes: u32,
    /// Subset must be larger than this before the anomaly detector engages
    #[serde(default = "default_anomaly_min_subset")]
    pub anomaly_min_subset: usize,
    /// Characters of normalized transcript used as the signature
    #[serde(default = "default_anomaly_prefix_chars")]
    pub anomaly_prefix_chars: usize,
    /// Share of the subset a single signature may hold (exclusive)
    #[serde(default = "default_anomaly_max_share")]
    pub anomaly_max_share: f64,
    /// More priority fixes than this routes a proposal to approval
    #[serde(default = "default_approval_max_priority_fixes")]
    pub approval_max_priority_fixes: usize,
    /// More new sections than this routes a proposal to approval
    #[serde(default = "default_approval_max_new_sections")]
    pub approval_max_new_sections: usize,
    /// Example interaction ids kept per issue category
    #[serde(default = "default_max_examples_per_issue")]
    pub max_examples_per_issue: usize,
}

fn default_min_lookback_hours() -> u32 {
    6
}

fn default_max_lookback_hours() -> u32 {
    72
}

fn default_min_interactions() -> usize {
    10
}

fn default_harvest_limit() -> usize {
    1000
}

fn default_profanity_threshold() -> usize {
    2
}

fn default_anomaly_window_minutes() -> u32 {
    60
}

fn default_anomaly_min_subset() -> usize {
    10
}

fn default_anomaly_prefix_chars() -> usize {
    100
}

fn default_anomaly_max_share() -> f64 {
    0.30
}

fn default_approval_max_priority_fixes() -> usize {
    3
}

fn default_approval_max_new_sections() -> usize {
    2
}

fn default_max_examples_per_issue() -> usize {
    3
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_lookback_hours: default_min_lookback_hours(),
            max_lookback_hours: default_max_lookback_hours(),
            min_interactions: default_min_interactions(),
            harvest_limit: default_harvest_limit(),
            profanity_threshold: default_profanity_threshold(),
            anomaly_window_minutes: default_anomaly_window_minutes(),
            anomaly_min_subset: default_anomaly_min_subset(),
            anomaly_prefix_chars: default_anomaly_prefix_chars(),
            anomaly_max_share: default_anomaly_max_share(),
            approval_max_priority_fixes: default_approval_max_priority_fixes(),
            approval_max_new_sections: default_approval_max_new_sections(),
            max_examples_per_issue: default_max_examples_per_issue(),
        }
    }
}

/// Identity and safety text that must survive every automated edit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_brand_name")]
    pub brand_name: String,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    /// Hard safety keywords, e.g. routing flags the telephony layer reacts to
    #[serde(default = "default_safety_tokens")]
    pub safety_tokens: Vec<String>,
}

fn default_brand_name() -> String {
    "Harvest Table".to_string()
}

fn default_safety_tokens() -> Vec<String> {
    vec!["transfer_to_human".to_string()]
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            brand_name: default_brand_name(),
            agent_name: default_agent_name(),
            safety_tokens: default_safety_tokens(),
        }
    }
}

impl IdentityConfig {
    /// All tokens that must be present in the agent's behavior text
    pub fn core_tokens(&self) -> Vec<String> {
        let mut tokens = vec![self.brand_name.clone(), self.agent_name.clone()];
        tokens.extend(self.safety_tokens.iter().cloned());
        tokens.retain(|t| !t.trim().is_empty());
        tokens
    }
}

/// External service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_call_platform_url")]
    pub call_platform_url: String,
    #[serde(default = "default_knowledge_store_url")]
    pub knowledge_store_url: String,
    /// Agent configuration service; usually the call platform itself
    #[serde(default = "default_call_platform_url")]
    pub agent_config_url: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_call_platform_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_knowledge_store_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_synthesis_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            call_platform_url: default_call_platform_url(),
            knowledge_store_url: default_knowledge_store_url(),
            agent_config_url: default_call_platform_url(),
            llm_base_url: default_llm_base_url(),
            synthesis_model: default_synthesis_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression (seconds precision) for cycle eligibility
    #[serde(default = "default_cron")]
    pub cron: String,
}

fn default_cron() -> String {
    "0 0 3 * * *".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { cron: default_cron() }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Resolve the data directory, honoring the override
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "call-learner", "call-learner")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "call-learner", "call-learner")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    let path = config_path()?;
    println!("Config file: {}", path.display());
    println!("Data dir:    {}", config.resolve_data_dir()?.display());
    println!();
    println!("{}", toml::to_string_pretty(config).context("Failed to serialize config")?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [agent]
            id = "agent_42"

            [learning]
            min_interactions = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.id, "agent_42");
        assert_eq!(config.agent.name, "Riley");
        assert_eq!(config.learning.min_interactions, 25);
        assert_eq!(config.learning.max_lookback_hours, 72);
        assert!((config.learning.anomaly_max_share - 0.30).abs() < f64::EPSILON);
        assert_eq!(config.schedule.cron, "0 0 3 * * *");
    }

    #[test]
    fn test_core_tokens_include_identity_and_safety() {
        let identity = IdentityConfig::default();
        let tokens = identity.core_tokens();
        assert!(tokens.contains(&"Harvest Table".to_string()));
        assert!(tokens.contains(&"Riley".to_string()));
        assert!(tokens.contains(&"transfer_to_human".to_string()));
    }

    #[test]
    fn test_knowledge_base_name_is_deterministic() {
        let agent = AgentConfig {
            id: "a1".into(),
            name: "  Riley ".into(),
        };
        assert_eq!(agent.knowledge_base_name(), "Riley - Learned Knowledge");
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.learning.profanity_threshold = 4;
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.learning.profanity_threshold, 4);
    }
}
