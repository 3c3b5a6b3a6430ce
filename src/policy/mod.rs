pub mod project;

use crate::error::Error;
use crate::scan::Severity;
use project::ProjectDirectory;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Policy applied to every project regardless of its own settings.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
pub struct PolicyOverride {
    #[serde(default)]
    pub content_trust: bool,
    #[serde(default)]
    pub prevent_vulnerable: bool,
    #[serde(default = "PolicyOverride::default_severity")]
    pub severity: Severity,
}

impl PolicyOverride {
    fn default_severity() -> Severity {
        Severity::Low
    }

    /// Reads the `PROJECT_CONTENT_TRUST` switch: `1` or `true` enforce content trust only.
    pub fn from_env_value(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            Some("1") => Some(Self::content_trust_only()),
            Some(value) if value.eq_ignore_ascii_case("true") => Some(Self::content_trust_only()),
            _ => None,
        }
    }

    fn content_trust_only() -> Self {
        Self {
            content_trust: true,
            prevent_vulnerable: false,
            severity: Self::default_severity(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PolicyDecision {
    pub content_trust: bool,
    /// Images with a severity at or above this level are refused.
    pub severity_threshold: Option<Severity>,
}

impl PolicyDecision {
    pub fn enforces_anything(&self) -> bool {
        self.content_trust || self.severity_threshold.is_some()
    }
}

#[derive(Clone)]
pub struct PolicyChecker {
    directory: Arc<dyn ProjectDirectory>,
    policy_override: Option<PolicyOverride>,
}

impl PolicyChecker {
    pub fn new(
        directory: Arc<dyn ProjectDirectory>,
        policy_override: Option<PolicyOverride>,
    ) -> Self {
        Self {
            directory,
            policy_override,
        }
    }

    pub async fn content_trust_enabled(&self, project: &str) -> Result<bool, Error> {
        Ok(self.decision(project).await?.content_trust)
    }

    pub async fn vulnerable_enabled(&self, project: &str) -> Result<(bool, Severity), Error> {
        let decision = self.decision(project).await?;
        Ok(match decision.severity_threshold {
            Some(severity) => (true, severity),
            None => (false, Severity::default()),
        })
    }

    #[instrument(skip(self))]
    pub async fn decision(&self, project: &str) -> Result<PolicyDecision, Error> {
        if let Some(policy_override) = &self.policy_override {
            return Ok(PolicyDecision {
                content_trust: policy_override.content_trust,
                severity_threshold: policy_override
                    .prevent_vulnerable
                    .then_some(policy_override.severity),
            });
        }

        let Some(project) = self.directory.get(project).await? else {
            debug!("Project {project} is unknown, no policy enforced");
            return Ok(PolicyDecision::default());
        };

        Ok(PolicyDecision {
            content_trust: project.content_trust,
            severity_threshold: project.prevent_vulnerable.then_some(project.severity),
        })
    }
}
