use crate::error::Error;
use crate::oci::Digest;
use crate::scan::{JobStatus, ScanJob, ScanOverview, ScanStore, Severity};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;

/// In-memory scan store used by tests.
#[derive(Debug, Default)]
pub struct Backend {
    overviews: HashMap<Digest, ScanOverview>,
    jobs: HashMap<i64, ScanJob>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a scan of `digest` whose job ended with `status`.
    pub fn with_scan(
        mut self,
        repository: &str,
        tag: &str,
        digest: &Digest,
        status: JobStatus,
        severity: Severity,
    ) -> Self {
        let id = i64::try_from(self.jobs.len()).unwrap_or_default() + 1;
        self.jobs.insert(
            id,
            ScanJob {
                id,
                status,
                repository: repository.to_string(),
                tag: tag.to_string(),
            },
        );
        self.overviews.insert(
            digest.clone(),
            ScanOverview {
                image_digest: digest.clone(),
                scan_status: status,
                job_id: id,
                severity: Some(severity),
                components: None,
                details_key: format!("details-{id}"),
                creation_time: Utc::now(),
                update_time: Utc::now(),
            },
        );
        self
    }
}

#[async_trait]
impl ScanStore for Backend {
    async fn scan_overview(&self, digest: &Digest) -> Result<Option<ScanOverview>, Error> {
        Ok(self.overviews.get(digest).cloned())
    }

    async fn scan_job(&self, id: i64) -> Result<Option<ScanJob>, Error> {
        Ok(self.jobs.get(&id).cloned())
    }
}
