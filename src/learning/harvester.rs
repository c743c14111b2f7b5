//! Interaction Harvester - pulls one window of finished calls from the call platform
//!
//! Read-only. Any transport failure fails the whole harvest; a partial list is
//! never returned.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::error::HarvestError;
use super::http::ServiceClient;
use crate::types::{AnalysisWindow, InteractionRecord};

/// Request sent to the call platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestQuery {
    pub agent_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub limit: usize,
}

/// Source of interaction records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InteractionSource: Send + Sync {
    async fn fetch(&self, query: &HarvestQuery) -> Result<Vec<InteractionRecord>>;
}

/// The platform answers either with a bare array or a wrapped one
#[derive(Deserialize)]
#[serde(untagged)]
enum InteractionListing {
    Bare(Vec<InteractionRecord>),
    Wrapped { interactions: Vec<InteractionRecord> },
}

/// REST adapter for the call platform
pub struct HttpCallPlatform {
    client: ServiceClient,
}

impl HttpCallPlatform {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl InteractionSource for HttpCallPlatform {
    async fn fetch(&self, query: &HarvestQuery) -> Result<Vec<InteractionRecord>> {
        let listing: InteractionListing = self.client.post_json("interactions/query", query).await?;
        Ok(match listing {
            InteractionListing::Bare(records) => records,
            InteractionListing::Wrapped { interactions } => interactions,
        })
    }
}

/// Fetches and window-checks interactions
pub struct Harvester {
    source: Arc<dyn InteractionSource>,
    limit: usize,
}

impl Harvester {
    pub fn new(source: Arc<dyn InteractionSource>, limit: usize) -> Self {
        Self { source, limit }
    }

    /// Interactions inside `window`, oldest first
    pub async fn harvest(
        &self,
        agent_id: &str,
        window: &AnalysisWindow,
    ) -> Result<Vec<InteractionRecord>, HarvestError> {
        let query = HarvestQuery {
            agent_id: agent_id.to_string(),
            window_start: window.start,
            window_end: window.end,
            limit: self.limit,
        };

        let fetched = self
            .source
            .fetch(&query)
            .await
            .map_err(|source| HarvestError::Platform {
                agent_id: agent_id.to_string(),
                source,
            })?;

        let fetched_count = fetched.len();
        let mut records: Vec<InteractionRecord> = fetched
            .into_iter()
            .filter(|r| window.contains(r.timestamp))
            .collect();

        if records.len() < fetched_count {
            warn!(
                agent_id = %agent_id,
                discarded = fetched_count - records.len(),
                "Call platform returned interactions outside the window"
            );
        }
        if fetched_count >= self.limit {
            warn!(agent_id = %agent_id, limit = self.limit, "Harvest hit the request limit; window may be truncated");
        }

        records.sort_by_key(|r| r.timestamp);

        info!(
            agent_id = %agent_id,
            window_start = %window.start,
            window_end = %window.end,
            harvested = records.len(),
            "Harvested interactions"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, OutcomeFlags};
    use chrono::Duration as ChronoDuration;

    fn record(id: &str, ts: DateTime<Utc>) -> InteractionRecord {
        InteractionRecord {
            id: id.to_string(),
            transcript: "User: hi".to_string(),
            outcome: OutcomeFlags::default(),
            custom_fields: Default::default(),
            timestamp: ts,
            direction: Direction::Inbound,
        }
    }

    #[tokio::test]
    async fn test_harvest_drops_out_of_window_records() {
        let now = Utc::now();
        let window = AnalysisWindow {
            start: now - ChronoDuration::hours(6),
            end: now,
        };
        let inside_late = record("b", now - ChronoDuration::hours(1));
        let inside_early = record("a", now - ChronoDuration::hours(5));
        let outside = record("old", now - ChronoDuration::hours(7));

        let mut source = MockInteractionSource::new();
        source
            .expect_fetch()
            .withf(|q| q.agent_id == "agent_1" && q.limit == 100)
            .times(1)
            .returning(move |_| Ok(vec![inside_late.clone(), outside.clone(), inside_early.clone()]));

        let harvester = Harvester::new(Arc::new(source), 100);
        let records = harvester.harvest("agent_1", &window).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_harvest_tolerates_zero_results() {
        let now = Utc::now();
        let window = AnalysisWindow {
            start: now - ChronoDuration::hours(6),
            end: now,
        };
        let mut source = MockInteractionSource::new();
        source.expect_fetch().returning(|_| Ok(Vec::new()));

        let harvester = Harvester::new(Arc::new(source), 100);
        assert!(harvester.harvest("agent_1", &window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_harvest_failure_propagates() {
        let now = Utc::now();
        let window = AnalysisWindow {
            start: now - ChronoDuration::hours(6),
            end: now,
        };
        let mut source = MockInteractionSource::new();
        source
            .expect_fetch()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let harvester = Harvester::new(Arc::new(source), 100);
        let err = harvester.harvest("agent_1", &window).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_listing_accepts_both_shapes() {
        let bare = r#"[{"id":"c1","timestamp":"2026-03-01T10:00:00Z","direction":"inbound"}]"#;
        let wrapped = r#"{"interactions":[{"id":"c1","timestamp":"2026-03-01T10:00:00Z","direction":"outbound"}]}"#;
        assert!(matches!(
            serde_json::from_str::<InteractionListing>(bare).unwrap(),
            InteractionListing::Bare(v) if v.len() == 1
        ));
        assert!(matches!(
            serde_json::from_str::<InteractionListing>(wrapped).unwrap(),
            InteractionListing::Wrapped { interactions } if interactions.len() == 1
        ));
    }
}
