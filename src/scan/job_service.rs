use crate::error::Error;
use crate::http_client::{upstream_error, HttpClient, RequestOptions};
use crate::oci::Digest;
use crate::scan::ScanTrigger;
use async_trait::async_trait;
use hyper::Method;
use serde::Serialize;
use tracing::{info, instrument};

#[derive(Debug, Serialize)]
struct ScanJobRequest<'a> {
    repository: &'a str,
    tag: &'a str,
    digest: String,
}

/// Submits scan jobs to the job service.
#[derive(Clone, Debug)]
pub struct JobServiceClient {
    client: HttpClient,
    url: String,
}

impl JobServiceClient {
    pub fn new(client: HttpClient, url: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    fn scan_url(&self) -> String {
        format!("{}/api/jobs/scan", self.url)
    }
}

#[async_trait]
impl ScanTrigger for JobServiceClient {
    #[instrument(skip(self))]
    async fn trigger_scan(
        &self,
        repository: &str,
        tag: &str,
        digest: &Digest,
    ) -> Result<(), Error> {
        let body = serde_json::to_vec(&ScanJobRequest {
            repository,
            tag,
            digest: digest.to_string(),
        })?;

        let response = self
            .client
            .request(Method::POST, &self.scan_url(), &RequestOptions::json(body))
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        info!("Scan job submitted for {repository}:{tag}");
        Ok(())
    }
}
