use crate::error::Error;
use crate::http_client::{read_body, upstream_error, HttpClient, RequestOptions};
use crate::notary::{SignedTarget, TrustStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::{Method, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

const TARGETS_ROLE: &str = "targets";
const RELEASES_ROLE: &str = "targets/releases";

#[derive(Debug, Deserialize)]
struct SignedMetadata {
    signed: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TargetsMetadata {
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    targets: BTreeMap<String, TargetMeta>,
}

#[derive(Debug, Deserialize)]
struct TargetMeta {
    hashes: HashMap<String, String>,
    length: i64,
    #[serde(default)]
    custom: Option<serde_json::Value>,
}

impl TargetsMetadata {
    /// Only a `signed` object carrying a `targets` map is accepted.
    fn from_slice(body: &[u8]) -> Result<Self, Error> {
        let corrupted = |error: serde_json::Error| {
            Error::DataCorruption(format!("invalid TUF targets metadata: {error}"))
        };

        let metadata: SignedMetadata = serde_json::from_slice(body).map_err(corrupted)?;
        if !metadata.signed.is_object() {
            return Err(Error::DataCorruption(
                "invalid TUF targets metadata: `signed` is not an object".to_string(),
            ));
        }

        serde_json::from_value(metadata.signed).map_err(corrupted)
    }

    fn into_targets(self) -> Vec<SignedTarget> {
        let expiration = self.expires;
        self.targets
            .into_iter()
            .map(|(tag, meta)| SignedTarget {
                tag,
                hashes: meta.hashes,
                length: meta.length,
                expiration,
                custom: meta.custom,
            })
            .collect()
    }
}

/// Reads signed targets from a Notary server.
///
/// A repository is published in Notary under the globally unique name
/// `{registry_host}/{repository}`.
#[derive(Clone, Debug)]
pub struct NotaryClient {
    client: HttpClient,
    url: String,
    registry_host: String,
}

impl NotaryClient {
    pub fn new(client: HttpClient, url: &str, registry_host: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            registry_host: registry_host.to_string(),
        }
    }

    fn role_url(&self, repository: &str, role: &str) -> String {
        format!(
            "{}/v2/{}/{repository}/_trust/tuf/{role}.json",
            self.url, self.registry_host
        )
    }

    /// Targets published by `role`; an unknown repository or role has none.
    async fn role_targets(
        &self,
        actor: &str,
        repository: &str,
        role: &str,
    ) -> Result<Vec<SignedTarget>, Error> {
        let options = RequestOptions::default().with_account(actor);
        let response = self
            .client
            .request(Method::GET, &self.role_url(repository, role), &options)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No {role} metadata for {repository}");
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let body = read_body(response).await?;
        Ok(TargetsMetadata::from_slice(&body)?.into_targets())
    }
}

#[async_trait]
impl TrustStore for NotaryClient {
    #[instrument(skip(self))]
    async fn list_targets(
        &self,
        actor: &str,
        repository: &str,
    ) -> Result<Vec<SignedTarget>, Error> {
        let targets = self.role_targets(actor, repository, TARGETS_ROLE).await?;
        let releases = self.role_targets(actor, repository, RELEASES_ROLE).await?;

        Ok(merge_roles(targets, releases))
    }
}

/// Targets of the top-level role win over a delegation publishing the same tag.
fn merge_roles(mut targets: Vec<SignedTarget>, delegated: Vec<SignedTarget>) -> Vec<SignedTarget> {
    for target in delegated {
        if !targets.iter().any(|t| t.tag == target.tag) {
            targets.push(target);
        }
    }
    targets
}
