//! Keyring integration for service API keys
//! Falls back to file storage if keyring is unavailable

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

const SERVICE_NAME: &str = "call-learner";

/// External services that need a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedService {
    CallPlatform,
    /// Agent configuration service; uses the call platform key when unset
    AgentConfig,
    KnowledgeStore,
    Llm,
}

impl KeyedService {
    pub const ALL: [KeyedService; 4] = [
        KeyedService::CallPlatform,
        KeyedService::AgentConfig,
        KeyedService::KnowledgeStore,
        KeyedService::Llm,
    ];

    fn username(&self) -> &'static str {
        match self {
            KeyedService::CallPlatform => "call-platform-api-key",
            KeyedService::AgentConfig => "agent-config-api-key",
            KeyedService::KnowledgeStore => "knowledge-store-api-key",
            KeyedService::Llm => "llm-api-key",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            KeyedService::CallPlatform => "call_platform_key.txt",
            KeyedService::AgentConfig => "agent_config_key.txt",
            KeyedService::KnowledgeStore => "knowledge_store_key.txt",
            KeyedService::Llm => "llm_key.txt",
        }
    }

    /// Environment variable checked before the keyring
    pub fn env_var(&self) -> &'static str {
        match self {
            KeyedService::CallPlatform => "CALL_LEARNER_PLATFORM_KEY",
            KeyedService::AgentConfig => "CALL_LEARNER_AGENT_CONFIG_KEY",
            KeyedService::KnowledgeStore => "CALL_LEARNER_KNOWLEDGE_KEY",
            KeyedService::Llm => "OPENROUTER_API_KEY",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyedService::CallPlatform => "call-platform",
            KeyedService::AgentConfig => "agent-config",
            KeyedService::KnowledgeStore => "knowledge-store",
            KeyedService::Llm => "llm",
        }
    }

    /// Service whose key is used when this one has none of its own
    pub fn fallback(&self) -> Option<KeyedService> {
        match self {
            KeyedService::AgentConfig => Some(KeyedService::CallPlatform),
            _ => None,
        }
    }
}

impl std::str::FromStr for KeyedService {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "call-platform" | "platform" => Ok(KeyedService::CallPlatform),
            "agent-config" | "agent" => Ok(KeyedService::AgentConfig),
            "knowledge-store" | "knowledge" => Ok(KeyedService::KnowledgeStore),
            "llm" | "openrouter" => Ok(KeyedService::Llm),
            other => bail!(
                "Unknown service '{}'. Expected one of: call-platform, agent-config, knowledge-store, llm",
                other
            ),
        }
    }
}

fn key_file_path(service: KeyedService) -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "call-learner", "call-learner")
        .context("Failed to get project directories")?;
    let dir = base.config_dir();
    fs::create_dir_all(dir).context("Failed to create config directory")?;
    Ok(dir.join(service.file_name()))
}

/// Set an API key - tries keyring first, falls back to file
pub fn set_api_key(service: KeyedService, key: &str) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, service.username()) {
        if entry.set_password(key).is_ok() {
            return Ok(());
        }
    }

    save_to_file(service, key)?;
    println!("Note: Using file-based storage (keyring unavailable)");
    Ok(())
}

fn save_to_file(service: KeyedService, key: &str) -> Result<()> {
    let path = key_file_path(service)?;
    fs::write(&path, key).context("Failed to write API key file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }

    Ok(())
}

/// Get an API key - environment, then keyring, then file
pub fn get_api_key(service: KeyedService) -> Result<String> {
    if let Ok(key) = std::env::var(service.env_var()) {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, service.username()) {
        if let Ok(key) = entry.get_password() {
            return Ok(key);
        }
    }

    let path = key_file_path(service)?;
    let key = fs::read_to_string(&path).with_context(|| {
        format!(
            "Failed to read {} API key. Run 'call-learner config set-key {} YOUR_KEY' first.",
            service.as_str(),
            service.as_str()
        )
    })?;
    Ok(key.trim().to_string())
}

/// Key if configured anywhere, else the fallback service's key
///
/// Services without auth are allowed, so a missing key is `None`.
pub fn optional_api_key(service: KeyedService) -> Option<String> {
    get_api_key(service)
        .ok()
        .or_else(|| service.fallback().and_then(|fallback| get_api_key(fallback).ok()))
}

/// Delete an API key from both keyring and file
pub fn delete_api_key(service: KeyedService) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, service.username()) {
        let _ = entry.delete_credential();
    }

    let path = key_file_path(service)?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to delete API key file")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_service_names() {
        assert_eq!("call-platform".parse::<KeyedService>().unwrap(), KeyedService::CallPlatform);
        assert_eq!("Knowledge".parse::<KeyedService>().unwrap(), KeyedService::KnowledgeStore);
        assert_eq!("openrouter".parse::<KeyedService>().unwrap(), KeyedService::Llm);
        assert_eq!("agent".parse::<KeyedService>().unwrap(), KeyedService::AgentConfig);
        assert!("mail".parse::<KeyedService>().is_err());
    }

    #[test]
    fn test_service_names_roundtrip() {
        for service in KeyedService::ALL {
            assert_eq!(service.as_str().parse::<KeyedService>().unwrap(), service);
        }
    }

    #[test]
    fn test_agent_config_falls_back_to_platform_key() {
        assert_eq!(KeyedService::AgentConfig.fallback(), Some(KeyedService::CallPlatform));
        assert_eq!(KeyedService::CallPlatform.fallback(), None);
        assert_ne!(KeyedService::AgentConfig.env_var(), KeyedService::CallPlatform.env_var());
    }
}
