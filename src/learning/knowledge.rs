//! Knowledge store and agent configuration seams
//!
//! The knowledge store only offers whole-resource operations: list, create
//! with a full document set, retrieve, and delete. There is no upsert. The
//! agent directory holds the live agent's behavior text and the knowledge
//! bases linked to it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::http::ServiceClient;

/// Metadata carried by each learned document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub issue_type: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub first_seen: DateTime<Utc>,
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    #[serde(default)]
    pub origin_cycle: String,
}

fn default_frequency() -> u32 {
    1
}

/// One learned document; `title` is unique within a knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub title: String,
    pub body: String,
    pub metadata: DocumentMetadata,
}

/// Listing entry for a knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A knowledge base with its full document set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub documents: Vec<KnowledgeDocument>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl KnowledgeBase {
    pub fn titles(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.title.as_str()).collect()
    }
}

/// Whole-resource knowledge store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn list(&self) -> Result<Vec<KnowledgeBaseSummary>>;

    async fn create(&self, name: &str, documents: &[KnowledgeDocument]) -> Result<KnowledgeBaseSummary>;

    /// `Ok(None)` when the id does not exist
    async fn retrieve(&self, id: &str) -> Result<Option<KnowledgeBase>>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Live agent configuration as the directory reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub behavior_text: String,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
}

/// Agent configuration service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn fetch_profile(&self, agent_id: &str) -> Result<AgentProfile>;

    async fn update_behavior(&self, agent_id: &str, behavior_text: &str) -> Result<()>;

    async fn set_knowledge_bases(&self, agent_id: &str, knowledge_base_ids: &[String]) -> Result<()>;
}

/// REST adapter for the knowledge store
pub struct HttpKnowledgeStore {
    client: ServiceClient,
}

impl HttpKnowledgeStore {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl KnowledgeStore for HttpKnowledgeStore {
    async fn list(&self) -> Result<Vec<KnowledgeBaseSummary>> {
        self.client.get_json("knowledge-bases").await
    }

    async fn create(&self, name: &str, documents: &[KnowledgeDocument]) -> Result<KnowledgeBaseSummary> {
        let body = json!({
            "name": name,
            "documents": documents,
        });
        self.client.post_json("knowledge-bases", &body).await
    }

    async fn retrieve(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        self.client.get_json_optional(&format!("knowledge-bases/{}", id)).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.client.delete(&format!("knowledge-bases/{}", id)).await
    }
}

/// REST adapter for the agent configuration service
pub struct HttpAgentDirectory {
    client: ServiceClient,
}

impl HttpAgentDirectory {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl AgentDirectory for HttpAgentDirectory {
    async fn fetch_profile(&self, agent_id: &str) -> Result<AgentProfile> {
        self.client.get_json(&format!("agents/{}", agent_id)).await
    }

    async fn update_behavior(&self, agent_id: &str, behavior_text: &str) -> Result<()> {
        self.client
            .patch_json(&format!("agents/{}", agent_id), &json!({ "behavior_text": behavior_text }))
            .await
    }

    async fn set_knowledge_bases(&self, agent_id: &str, knowledge_base_ids: &[String]) -> Result<()> {
        self.client
            .patch_json(
                &format!("agents/{}", agent_id),
                &json!({ "knowledge_base_ids": knowledge_base_ids }),
            )
            .await
    }
}
