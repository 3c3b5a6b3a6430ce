use crate::error::Error;
use crate::oci::Digest;
use crate::scan::{ScanJob, ScanOverview, ScanStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, instrument};

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default = "BackendConfig::default_key_prefix")]
    pub key_prefix: String,
}

impl BackendConfig {
    fn default_key_prefix() -> String {
        "scan:".to_string()
    }
}

/// Scan results written by the scanner as JSON documents.
///
/// Overviews live under `{prefix}overview:{digest}`, jobs under `{prefix}job:{id}`.
#[derive(Debug)]
pub struct Backend {
    client: redis::Client,
    key_prefix: String,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Result<Self, Error> {
        info!("Using Redis scan store");
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Backend {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, Error> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn overview_key(&self, digest: &Digest) -> String {
        format!("{}overview:{digest}", self.key_prefix)
    }

    fn job_key(&self, id: i64) -> String {
        format!("{}job:{id}", self.key_prefix)
    }

    async fn retrieve<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, Error> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(&key).await?;

        value
            .map(|value| {
                serde_json::from_str(&value).map_err(|error| {
                    Error::DataCorruption(format!("invalid scan record '{key}': {error}"))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl ScanStore for Backend {
    #[instrument(skip(self))]
    async fn scan_overview(&self, digest: &Digest) -> Result<Option<ScanOverview>, Error> {
        self.retrieve(self.overview_key(digest)).await
    }

    #[instrument(skip(self))]
    async fn scan_job(&self, id: i64) -> Result<Option<ScanJob>, Error> {
        self.retrieve(self.job_key(id)).await
    }
}
