use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

mod error;
pub mod watcher;

use crate::http_client::ClientConfig;
use crate::policy::project::ProjectConfig;
use crate::policy::PolicyOverride;
use crate::scan;
pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub server: ServerConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub trust: Option<TrustConfig>,
    #[serde(default)]
    pub scanner: Option<ScannerConfig>,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub project: HashMap<String, ProjectConfig>, // hashmap of project name <-> project policy
    #[serde(default)]
    pub replication: Option<ReplicationConfig>,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
}

impl ServerConfig {
    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "GlobalConfig::default_max_concurrent_background_jobs")]
    pub max_concurrent_background_jobs: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            max_concurrent_requests: GlobalConfig::default_max_concurrent_requests(),
            max_concurrent_background_jobs: GlobalConfig::default_max_concurrent_background_jobs(),
        }
    }
}

impl GlobalConfig {
    fn default_max_concurrent_requests() -> usize {
        4
    }

    fn default_max_concurrent_background_jobs() -> usize {
        4
    }
}

/// The registry requests are forwarded to.
#[derive(Clone, Debug, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    #[serde(flatten)]
    pub client: ClientConfig,
}

/// The Notary server holding the trust data of the registry.
#[derive(Clone, Debug, Deserialize)]
pub struct TrustConfig {
    pub url: String,
    /// Host name of the registry as it appears in trust collection names.
    pub registry_host: String,
    /// Account used to read trust data while enforcing policy.
    #[serde(default = "TrustConfig::default_actor")]
    pub actor: String,
    #[serde(flatten)]
    pub client: ClientConfig,
}

impl TrustConfig {
    fn default_actor() -> String {
        "admin".to_string()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub redis: Option<scan::redis::BackendConfig>,
    #[serde(default)]
    pub job_service_url: Option<String>,
    #[serde(default)]
    pub allow_unscanned: bool,
    #[serde(flatten)]
    pub client: ClientConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PolicyConfig {
    /// Number of leading repository path components naming the project.
    #[serde(default = "PolicyConfig::default_project_segments")]
    pub project_segments: usize,
    #[serde(default, rename = "override")]
    pub policy_override: Option<PolicyOverride>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            project_segments: PolicyConfig::default_project_segments(),
            policy_override: None,
        }
    }
}

impl PolicyConfig {
    fn default_project_segments() -> usize {
        1
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplicationConfig {
    pub webhook_url: String,
    #[serde(flatten)]
    pub client: ClientConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.policy.project_segments == 0 {
            return Err(Error::InvalidValue(
                "policy.project_segments must be at least 1".to_string(),
            ));
        }

        if self.global.max_concurrent_requests == 0 {
            return Err(Error::InvalidValue(
                "global.max_concurrent_requests must be at least 1".to_string(),
            ));
        }

        let urls = [
            Some(("registry.url", &self.registry.url)),
            self.trust.as_ref().map(|trust| ("trust.url", &trust.url)),
            self.scanner
                .as_ref()
                .and_then(|scanner| scanner.job_service_url.as_ref())
                .map(|url| ("scanner.job_service_url", url)),
            self.replication
                .as_ref()
                .map(|replication| ("replication.webhook_url", &replication.webhook_url)),
        ];

        for (name, url) in urls.into_iter().flatten() {
            let is_http = url.starts_with("http://") || url.starts_with("https://");
            if !is_http || url.parse::<hyper::Uri>().is_err() {
                return Err(Error::InvalidValue(format!(
                    "{name} must be an absolute http(s) URL, got '{url}'"
                )));
            }
        }

        Ok(())
    }
}
