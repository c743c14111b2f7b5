//! Local state for the synchronizer
//!
//! Two plain files: the agent to knowledge-base id cache, and a staging area
//! holding the merged document set across the delete/create gap. Unreadable
//! files count as absent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::knowledge::KnowledgeDocument;

const CACHE_FILE: &str = "kb_cache.json";
const STAGING_DIR: &str = "staging";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheContents {
    #[serde(default)]
    agents: HashMap<String, String>,
}

/// Agent id to knowledge base id
#[derive(Debug, Clone)]
pub struct KnowledgeBaseCache {
    path: PathBuf,
}

impl KnowledgeBaseCache {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CACHE_FILE),
        }
    }

    fn load(&self) -> CacheContents {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return CacheContents::default();
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Knowledge base cache is corrupt; rebuilding");
            CacheContents::default()
        })
    }

    pub fn get(&self, agent_id: &str) -> Option<String> {
        self.load().agents.get(agent_id).cloned()
    }

    pub fn set(&self, agent_id: &str, kb_id: &str) -> Result<()> {
        let mut contents = self.load();
        contents.agents.insert(agent_id.to_string(), kb_id.to_string());
        write_json(&self.path, &contents)
    }

    pub fn remove(&self, agent_id: &str) -> Result<()> {
        let mut contents = self.load();
        if contents.agents.remove(agent_id).is_some() {
            write_json(&self.path, &contents)?;
        }
        Ok(())
    }
}

/// Merged document set held across a destructive replace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedSnapshot {
    pub agent_id: String,
    pub kb_name: String,
    pub documents: Vec<KnowledgeDocument>,
    /// Knowledge base ids this snapshot replaces; still linked if create failed
    #[serde(default)]
    pub replaced_ids: Vec<String>,
    pub staged_at: DateTime<Utc>,
}

/// One staging file per agent
#[derive(Debug, Clone)]
pub struct SnapshotStaging {
    dir: PathBuf,
}

impl SnapshotStaging {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(STAGING_DIR),
        }
    }

    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        let safe: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Write and fsync the snapshot
    pub fn write(&self, snapshot: &StagedSnapshot) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&snapshot.agent_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        {
            let file = fs::File::create(&tmp)?;
            use std::io::Write;
            let mut writer = std::io::BufWriter::new(file);
            writer.write_all(&bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Leftover snapshot from an interrupted synchronization
    pub fn read(&self, agent_id: &str) -> Option<StagedSnapshot> {
        let path = self.path_for(agent_id);
        let contents = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Staging file is corrupt; ignoring");
                None
            }
        }
    }

    pub fn clear(&self, agent_id: &str) -> Result<()> {
        let path = self.path_for(agent_id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove staging file {}", path.display()))?;
        }
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create data directory")?;
    }
    let contents = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
