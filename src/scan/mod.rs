pub mod job_service;
#[cfg(test)]
pub mod memory;
pub mod redis;

use crate::error::Error;
use crate::oci::Digest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::Visitor;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::{debug, warn};

/// Vulnerability severity, ordered from the least to the most severe.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    #[default]
    None = 1,
    Unknown = 2,
    Low = 3,
    Medium = 4,
    High = 5,
}

impl Severity {
    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn from_level(level: u64) -> Option<Self> {
        match level {
            1 => Some(Severity::None),
            2 => Some(Severity::Unknown),
            3 => Some(Severity::Low),
            4 => Some(Severity::Medium),
            5 => Some(Severity::High),
            _ => None,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "negligible" => Ok(Severity::None),
            "unknown" => Ok(Severity::Unknown),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" | "critical" => Ok(Severity::High),
            _ => Err(format!("unknown severity '{s}'")),
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::None => "none",
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{name}")
    }
}

impl Serialize for Severity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.level())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Severity, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SeverityVisitor;

        impl Visitor<'_> for SeverityVisitor {
            type Value = Severity;

            fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
                formatter.write_str("a severity level (1-5) or name")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Severity, E>
            where
                E: de::Error,
            {
                Severity::from_level(value)
                    .ok_or_else(|| E::custom(format!("invalid severity level {value}")))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Severity, E>
            where
                E: de::Error,
            {
                let level = u64::try_from(value)
                    .map_err(|_| E::custom(format!("invalid severity level {value}")))?;
                self.visit_u64(level)
            }

            fn visit_str<E>(self, value: &str) -> Result<Severity, E>
            where
                E: de::Error,
            {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SeverityVisitor)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Finished,
    Error,
    Stopped,
    Cancelled,
    Retrying,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ComponentSummary {
    pub severity: Severity,
    pub count: u32,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ComponentsOverview {
    pub total: u32,
    #[serde(default)]
    pub summary: Vec<ComponentSummary>,
}

/// The latest scan result recorded for an image digest.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScanOverview {
    pub image_digest: Digest,
    #[serde(default)]
    pub scan_status: JobStatus,
    pub job_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentsOverview>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details_key: String,
    pub creation_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl ScanOverview {
    pub fn is_finished(&self) -> bool {
        self.scan_status == JobStatus::Finished
    }

    /// Drops results that belong to a previous run while a new one is not finished.
    fn clear_results(&mut self) {
        self.severity = None;
        self.components = None;
        self.details_key.clear();
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScanJob {
    pub id: i64,
    pub status: JobStatus,
    pub repository: String,
    pub tag: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn scan_overview(&self, digest: &Digest) -> Result<Option<ScanOverview>, Error>;

    async fn scan_job(&self, id: i64) -> Result<Option<ScanJob>, Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanTrigger: Send + Sync {
    async fn trigger_scan(&self, repository: &str, tag: &str, digest: &Digest)
        -> Result<(), Error>;
}

/// Looks up the overview of `digest` and overlays the status of its scan job.
///
/// An overview whose job no longer exists is reported as absent. Results of a job that is
/// not finished are cleared.
pub async fn resolve_overview(
    store: &dyn ScanStore,
    digest: &Digest,
) -> Result<Option<ScanOverview>, Error> {
    let Some(mut overview) = store.scan_overview(digest).await? else {
        return Ok(None);
    };

    let Some(job) = store.scan_job(overview.job_id).await? else {
        warn!(
            "Scan job {} of {digest} does not exist, ignoring overview",
            overview.job_id
        );
        return Ok(None);
    };

    overview.scan_status = job.status;
    if !overview.is_finished() {
        debug!("Clearing stale scan results of {digest}, job status: {:?}", job.status);
        overview.clear_results();
    }

    Ok(Some(overview))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> Digest {
        "sha256:1359608115b94599e5641638bac5aef1ddfaa79bb96057ebf41ebc8d33acf8a7"
            .parse()
            .unwrap()
    }

    fn overview(status: JobStatus, severity: Severity) -> ScanOverview {
        ScanOverview {
            image_digest: digest(),
            scan_status: status,
            job_id: 7,
            severity: Some(severity),
            components: Some(ComponentsOverview {
                total: 3,
                summary: vec![ComponentSummary {
                    severity,
                    count: 3,
                }],
            }),
            details_key: "details-7".to_string(),
            creation_time: Utc::now(),
            update_time: Utc::now(),
        }
    }

    fn job(status: JobStatus) -> ScanJob {
        ScanJob {
            id: 7,
            status,
            repository: "library/ubuntu".to_string(),
            tag: "14.04".to_string(),
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::None < Severity::Unknown);
        assert!(Severity::Unknown < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert_eq!(Severity::High.level(), 5);
    }

    #[test]
    fn test_severity_serde() {
        assert_eq!(serde_json::to_string(&Severity::Medium).unwrap(), "4");
        assert_eq!(
            serde_json::from_str::<Severity>("3").unwrap(),
            Severity::Low
        );
        assert_eq!(
            serde_json::from_str::<Severity>("\"High\"").unwrap(),
            Severity::High
        );
        assert!(serde_json::from_str::<Severity>("9").is_err());
        assert!(serde_json::from_str::<Severity>("\"severe\"").is_err());
    }

    #[test]
    fn test_job_status_unknown_value() {
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"finished\"").unwrap(),
            JobStatus::Finished
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"vanished\"").unwrap(),
            JobStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_resolve_overview_finished_keeps_results() {
        let mut store = MockScanStore::new();
        store
            .expect_scan_overview()
            .returning(|_| Ok(Some(overview(JobStatus::Pending, Severity::High))));
        store
            .expect_scan_job()
            .withf(|id| *id == 7)
            .returning(|_| Ok(Some(job(JobStatus::Finished))));

        let resolved = resolve_overview(&store, &digest()).await.unwrap().unwrap();
        assert_eq!(resolved.scan_status, JobStatus::Finished);
        assert_eq!(resolved.severity, Some(Severity::High));
        assert!(resolved.components.is_some());
        assert_eq!(resolved.details_key, "details-7");
    }

    #[tokio::test]
    async fn test_resolve_overview_not_finished_clears_results() {
        for status in [JobStatus::Running, JobStatus::Error, JobStatus::Pending] {
            let mut store = MockScanStore::new();
            store
                .expect_scan_overview()
                .returning(|_| Ok(Some(overview(JobStatus::Finished, Severity::High))));
            store
                .expect_scan_job()
                .returning(move |_| Ok(Some(job(status))));

            let resolved = resolve_overview(&store, &digest()).await.unwrap().unwrap();
            assert_eq!(resolved.scan_status, status);
            assert_eq!(resolved.severity, None);
            assert_eq!(resolved.components, None);
            assert_eq!(resolved.details_key, "");

            let json = serde_json::to_value(&resolved).unwrap();
            assert!(json.get("severity").is_none());
            assert!(json.get("details_key").is_none());
        }
    }

    #[tokio::test]
    async fn test_resolve_overview_missing_job() {
        let mut store = MockScanStore::new();
        store
            .expect_scan_overview()
            .returning(|_| Ok(Some(overview(JobStatus::Finished, Severity::Low))));
        store.expect_scan_job().returning(|_| Ok(None));

        assert_eq!(resolve_overview(&store, &digest()).await, Ok(None));
    }

    #[tokio::test]
    async fn test_resolve_overview_without_record() {
        let mut store = MockScanStore::new();
        store.expect_scan_overview().returning(|_| Ok(None));
        store.expect_scan_job().never();

        assert_eq!(resolve_overview(&store, &digest()).await, Ok(None));
    }
}
