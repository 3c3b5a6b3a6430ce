use crate::error::Error;
use crate::scan::Severity;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub name: String,
    pub content_trust: bool,
    pub prevent_vulnerable: bool,
    pub severity: Severity,
}

/// Per-project policy settings, as written in `[project.<name>]`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub content_trust: bool,
    #[serde(default)]
    pub prevent_vulnerable: bool,
    #[serde(default = "ProjectConfig::default_severity")]
    pub severity: Severity,
}

impl ProjectConfig {
    fn default_severity() -> Severity {
        Severity::Low
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, Error>;

    async fn get(&self, name: &str) -> Result<Option<Project>, Error>;
}

/// Projects declared in the configuration file.
#[derive(Debug, Default)]
pub struct StaticProjectDirectory {
    projects: HashMap<String, Project>,
}

impl StaticProjectDirectory {
    pub fn new(projects: &HashMap<String, ProjectConfig>) -> Self {
        let projects = projects
            .iter()
            .map(|(name, config)| {
                let project = Project {
                    name: name.clone(),
                    content_trust: config.content_trust,
                    prevent_vulnerable: config.prevent_vulnerable,
                    severity: config.severity,
                };
                (name.clone(), project)
            })
            .collect();

        Self { projects }
    }
}

#[async_trait]
impl ProjectDirectory for StaticProjectDirectory {
    async fn exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.projects.contains_key(name))
    }

    async fn get(&self, name: &str) -> Result<Option<Project>, Error> {
        Ok(self.projects.get(name).cloned())
    }
}
