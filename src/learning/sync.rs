//! Knowledge Base Synchronizer
//!
//! The knowledge store cannot add a document to an existing knowledge base,
//! so every sync is snapshot, merge, stage, delete, recreate, relink. The
//! merged set is written to the staging area before the first destructive
//! call and only removed once the new knowledge base exists.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::cache::{KnowledgeBaseCache, SnapshotStaging, StagedSnapshot};
use super::error::SyncError;
use super::knowledge::{AgentDirectory, KnowledgeBase, KnowledgeDocument, KnowledgeStore};

/// Result of merging incoming documents into an existing set
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSet {
    pub documents: Vec<KnowledgeDocument>,
    /// Titles that were not present before
    pub added: Vec<String>,
    /// Titles whose document was replaced
    pub superseded: Vec<String>,
}

/// Merge `incoming` into `existing`, keyed by title
///
/// Existing order is kept and new titles are appended. A colliding title is
/// replaced in place: body and keywords come from the incoming document,
/// `first_seen` keeps the earlier value and `frequency` accumulates.
pub fn merge_documents(existing: Vec<KnowledgeDocument>, incoming: &[KnowledgeDocument]) -> MergedSet {
    let mut documents = existing;
    let mut index: HashMap<String, usize> = documents
        .iter()
        .enumerate()
        .map(|(i, d)| (d.title.clone(), i))
        .collect();
    let mut added = Vec::new();
    let mut superseded = Vec::new();

    for doc in incoming {
        match index.get(&doc.title) {
            Some(&i) => {
                let previous = &documents[i];
                let mut replacement = doc.clone();
                replacement.metadata.first_seen = previous.metadata.first_seen.min(doc.metadata.first_seen);
                replacement.metadata.frequency = previous.metadata.frequency.saturating_add(doc.metadata.frequency);
                documents[i] = replacement;
                if !superseded.contains(&doc.title) {
                    superseded.push(doc.title.clone());
                }
            }
            None => {
                index.insert(doc.title.clone(), documents.len());
                documents.push(doc.clone());
                added.push(doc.title.clone());
            }
        }
    }

    MergedSet {
        documents,
        added,
        superseded,
    }
}

/// Union several snapshots of the same logical knowledge base
///
/// Later layers win title conflicts wholesale.
pub fn union_snapshots(layers: Vec<Vec<KnowledgeDocument>>) -> Vec<KnowledgeDocument> {
    let mut documents: Vec<KnowledgeDocument> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for layer in layers {
        for doc in layer {
            match index.get(&doc.title) {
                Some(&i) => documents[i] = doc,
                None => {
                    index.insert(doc.title.clone(), documents.len());
                    documents.push(doc);
                }
            }
        }
    }
    documents
}

/// What one synchronization did
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub kb_id: String,
    pub replaced_ids: Vec<String>,
    pub total_documents: usize,
    pub added: Vec<String>,
    pub superseded: Vec<String>,
    pub recovered_from_staging: bool,
}

/// Snapshot-before-destructive-replace synchronizer
pub struct KnowledgeBaseSynchronizer {
    store: Arc<dyn KnowledgeStore>,
    directory: Arc<dyn AgentDirectory>,
    cache: KnowledgeBaseCache,
    staging: SnapshotStaging,
}

impl KnowledgeBaseSynchronizer {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        directory: Arc<dyn AgentDirectory>,
        cache: KnowledgeBaseCache,
        staging: SnapshotStaging,
    ) -> Self {
        Self {
            store,
            directory,
            cache,
            staging,
        }
    }

    /// Every knowledge base that currently represents the agent's learnings
    ///
    /// The cached id is preferred and treated as the freshest; any other
    /// knowledge base with the logical name is a stray from an earlier partial
    /// failure and gets folded in underneath it.
    async fn snapshot(&self, agent_id: &str, kb_name: &str) -> Result<Vec<KnowledgeBase>, SyncError> {
        let snapshot_err = |target: &str| {
            let target = target.to_string();
            move |source| SyncError::Snapshot { target, source }
        };

        let mut cached_kb = None;
        if let Some(cached_id) = self.cache.get(agent_id) {
            match self.store.retrieve(&cached_id).await.map_err(snapshot_err(&cached_id))? {
                Some(kb) => cached_kb = Some(kb),
                None => warn!(agent_id = %agent_id, kb_id = %cached_id, "Cached knowledge base no longer exists"),
            }
        }

        let listing = self.store.list().await.map_err(snapshot_err(kb_name))?;
        let mut strays = Vec::new();
        for summary in listing.iter().filter(|s| s.name == kb_name) {
            if cached_kb.as_ref().is_some_and(|kb| kb.id == summary.id) {
                continue;
            }
            if let Some(kb) = self.store.retrieve(&summary.id).await.map_err(snapshot_err(&summary.id))? {
                strays.push(kb);
            }
        }
        strays.sort_by_key(|kb| kb.created_at);

        if !strays.is_empty() && (cached_kb.is_some() || strays.len() > 1) {
            warn!(
                agent_id = %agent_id,
                duplicates = strays.len(),
                "Found duplicate knowledge bases under the logical name; folding them together"
            );
        }

        strays.extend(cached_kb);
        Ok(strays)
    }

    /// Merge `incoming` into the agent's knowledge base
    pub async fn synchronize(
        &self,
        agent_id: &str,
        kb_name: &str,
        incoming: &[KnowledgeDocument],
        now: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let existing = self.snapshot(agent_id, kb_name).await?;
        let mut replaced_ids: Vec<String> = existing.iter().map(|kb| kb.id.clone()).collect();

        let leftover = self.staging.read(agent_id);
        let recovered_from_staging = leftover.is_some();
        if let Some(ref staged) = leftover {
            warn!(
                agent_id = %agent_id,
                documents = staged.documents.len(),
                staged_at = %staged.staged_at,
                "Recovering documents from an interrupted synchronization"
            );
            for id in &staged.replaced_ids {
                if !replaced_ids.contains(id) {
                    replaced_ids.push(id.clone());
                }
            }
        }

        let mut layers: Vec<Vec<KnowledgeDocument>> = Vec::new();
        layers.extend(leftover.map(|s| s.documents));
        layers.extend(existing.into_iter().map(|kb| kb.documents));
        let base = union_snapshots(layers);
        let previous_count = base.len();

        let merged = merge_documents(base, incoming);

        let staged_at = self.stage(agent_id, kb_name, &merged.documents, &replaced_ids, now)?;

        for old_id in &replaced_ids {
            if let Err(e) = self.store.delete(old_id).await {
                warn!(agent_id = %agent_id, kb_id = %old_id, error = %e, "Failed to delete old knowledge base; continuing");
            }
        }

        let created = match self.store.create(kb_name, &merged.documents).await {
            Ok(created) => created,
            Err(source) => {
                error!(
                    agent_id = %agent_id,
                    kb_name = %kb_name,
                    documents = merged.documents.len(),
                    staged_at = %staged_at.display(),
                    error = %source,
                    "Knowledge base create failed after delete; merged documents exist only in the staging file"
                );
                return Err(SyncError::Create {
                    name: kb_name.to_string(),
                    documents: merged.documents.len(),
                    staged_at,
                    source,
                });
            }
        };

        if let Err(e) = self.staging.clear(agent_id) {
            warn!(agent_id = %agent_id, error = %e, "Failed to clear staging file");
        }
        if let Err(e) = self.cache.set(agent_id, &created.id) {
            warn!(agent_id = %agent_id, kb_id = %created.id, error = %e, "Failed to update knowledge base cache");
        }

        self.link(agent_id, &created.id, &replaced_ids).await?;

        info!(
            agent_id = %agent_id,
            kb_id = %created.id,
            previous = previous_count,
            total = merged.documents.len(),
            added = merged.added.len(),
            superseded = merged.superseded.len(),
            "Knowledge base synchronized"
        );

        Ok(SyncReport {
            kb_id: created.id,
            replaced_ids,
            total_documents: merged.documents.len(),
            added: merged.added,
            superseded: merged.superseded,
            recovered_from_staging,
        })
    }

    fn stage(
        &self,
        agent_id: &str,
        kb_name: &str,
        documents: &[KnowledgeDocument],
        replaced_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<PathBuf, SyncError> {
        let snapshot = StagedSnapshot {
            agent_id: agent_id.to_string(),
            kb_name: kb_name.to_string(),
            documents: documents.to_vec(),
            replaced_ids: replaced_ids.to_vec(),
            staged_at: now,
        };
        self.staging.write(&snapshot).map_err(|source| SyncError::Staging {
            path: self.staging.path_for(agent_id),
            source,
        })
    }

    /// Point the agent at `kb_id`, dropping references to replaced ids
    pub async fn link(&self, agent_id: &str, kb_id: &str, replaced_ids: &[String]) -> Result<(), SyncError> {
        let link_err = |source| SyncError::Link {
            agent_id: agent_id.to_string(),
            kb_id: kb_id.to_string(),
            source,
        };

        let profile = self.directory.fetch_profile(agent_id).await.map_err(link_err)?;
        let mut ids: Vec<String> = profile
            .knowledge_base_ids
            .iter()
            .filter(|id| !replaced_ids.contains(*id))
            .cloned()
            .collect();
        if !ids.iter().any(|id| id == kb_id) {
            ids.push(kb_id.to_string());
        }

        if ids == profile.knowledge_base_ids {
            return Ok(());
        }

        self.directory
            .set_knowledge_bases(agent_id, &ids)
            .await
            .map_err(link_err)?;
        info!(agent_id = %agent_id, kb_id = %kb_id, "Linked knowledge base to agent");
        Ok(())
    }
}
