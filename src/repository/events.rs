use crate::error::Error;
use crate::http_client::{upstream_error, HttpClient, RequestOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::Method;
use serde::Serialize;
use tracing::{debug, info, instrument};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TagDeletedEvent {
    pub repository: String,
    pub project: String,
    pub tag: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

/// Receives the side effects of a tag deletion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn tag_deleted(&self, event: &TagDeletedEvent) -> Result<(), Error>;
}

/// Records deletions as `tracing` events on the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuditLog;

#[async_trait]
impl EventSink for AuditLog {
    async fn tag_deleted(&self, event: &TagDeletedEvent) -> Result<(), Error> {
        info!(
            target: "audit",
            operation = "delete",
            repository = %event.repository,
            project = %event.project,
            tag = %event.tag,
            actor = %event.actor,
            occurred_at = %event.occurred_at,
            "Tag deleted"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ReplicationNotice<'a> {
    operation: &'static str,
    #[serde(flatten)]
    event: &'a TagDeletedEvent,
}

/// Notifies the replication service that a tag is gone.
#[derive(Clone, Debug)]
pub struct ReplicationWebhook {
    client: HttpClient,
    url: String,
}

impl ReplicationWebhook {
    pub fn new(client: HttpClient, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl EventSink for ReplicationWebhook {
    #[instrument(skip(self, event), fields(repository = %event.repository, tag = %event.tag))]
    async fn tag_deleted(&self, event: &TagDeletedEvent) -> Result<(), Error> {
        let body = serde_json::to_vec(&ReplicationNotice {
            operation: "delete",
            event,
        })?;

        let response = self
            .client
            .request(Method::POST, &self.url, &RequestOptions::json(body))
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        debug!("Replication notified");
        Ok(())
    }
}
