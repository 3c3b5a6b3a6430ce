use crate::error::{Error, PolicyViolation};
use crate::notary::{SignedTarget, TrustStore};
use crate::oci::manifest::{SCHEMA1_MEDIA_TYPE, SCHEMA1_SIGNED_MEDIA_TYPE, SCHEMA2_MEDIA_TYPE};
use crate::oci::{ImageManifest, Reference};
use crate::policy::project::ProjectDirectory;
use crate::proxy::matcher::project_of;
use crate::registry::RegistryClient;
use crate::repository::aggregator::Aggregator;
use crate::repository::events::{EventSink, TagDeletedEvent};
use crate::repository::model::{
    DeleteOutcome, ManifestResponse, RepositorySummary, TagResponse,
};
use crate::scan::{ScanStore, ScanTrigger};
use crate::task_queue::TaskQueue;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Repository and tag operations exposed on the `/api` routes.
pub struct RepositoryService {
    aggregator: Aggregator,
    registry: Arc<dyn RegistryClient>,
    projects: Arc<dyn ProjectDirectory>,
    trust: Option<Arc<dyn TrustStore>>,
    scan_trigger: Option<Arc<dyn ScanTrigger>>,
    task_queue: Option<Arc<TaskQueue>>,
    sinks: Vec<Arc<dyn EventSink>>,
    project_segments: usize,
}

impl RepositoryService {
    pub fn new(registry: Arc<dyn RegistryClient>, projects: Arc<dyn ProjectDirectory>) -> Self {
        Self {
            aggregator: Aggregator::new(registry.clone()),
            registry,
            projects,
            trust: None,
            scan_trigger: None,
            task_queue: None,
            sinks: Vec::new(),
            project_segments: 1,
        }
    }

    pub fn with_trust(mut self, trust: Arc<dyn TrustStore>) -> Self {
        self.aggregator = self.aggregator.with_trust(trust.clone());
        self.trust = Some(trust);
        self
    }

    pub fn with_scans(mut self, scans: Arc<dyn ScanStore>) -> Self {
        self.aggregator = self.aggregator.with_scans(scans);
        self
    }

    pub fn with_scan_trigger(mut self, scan_trigger: Arc<dyn ScanTrigger>) -> Self {
        self.scan_trigger = Some(scan_trigger);
        self
    }

    /// Deletion events are delivered to `sinks` by tasks of `task_queue`.
    pub fn with_events(
        mut self,
        task_queue: Arc<TaskQueue>,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Self {
        self.task_queue = Some(task_queue);
        self.sinks = sinks;
        self
    }

    pub fn with_project_segments(mut self, project_segments: usize) -> Self {
        self.project_segments = project_segments.max(1);
        self
    }

    async fn ensure_project(&self, repository: &str) -> Result<String, Error> {
        let project = project_of(repository, self.project_segments);
        self.ensure_project_exists(&project).await?;
        Ok(project)
    }

    async fn ensure_project_exists(&self, project: &str) -> Result<(), Error> {
        if self.projects.exists(project).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("project {project} not found")))
        }
    }

    #[instrument(skip(self))]
    pub async fn list_repositories(
        &self,
        project: Option<&str>,
    ) -> Result<Vec<RepositorySummary>, Error> {
        if let Some(project) = project {
            self.ensure_project_exists(project).await?;
        }

        let mut repositories = Vec::new();
        for name in self.registry.catalog().await? {
            let owner = project_of(&name, self.project_segments);
            if project.is_some_and(|project| project != owner) {
                continue;
            }

            let tags_count = self.aggregator.list_tag_names(&name).await?.len();
            repositories.push(RepositorySummary {
                name,
                project: owner,
                tags_count,
            });
        }

        Ok(repositories)
    }

    #[instrument(skip(self))]
    pub async fn list_tags(
        &self,
        repository: &str,
        actor: &str,
    ) -> Result<Vec<TagResponse>, Error> {
        self.ensure_project(repository).await?;

        let tags = self.aggregator.list_tag_names(repository).await?;
        self.aggregator.assemble(repository, &tags, actor).await
    }

    #[instrument(skip(self))]
    pub async fn get_tag(
        &self,
        repository: &str,
        tag: &str,
        actor: &str,
    ) -> Result<TagResponse, Error> {
        self.ensure_project(repository).await?;

        let reference = Reference::Tag(tag.to_string());
        if self
            .registry
            .manifest_exists(repository, &reference)
            .await?
            .is_none()
        {
            return Err(Error::NotFound(format!("{tag} not found")));
        }

        self.aggregator
            .assemble(repository, &[tag.to_string()], actor)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal(format!("no metadata assembled for {tag}")))
    }

    /// The manifest of `tag` in the requested schema `version` (`v1` or `v2`).
    ///
    /// Schema2 manifests come with their image configuration.
    #[instrument(skip(self))]
    pub async fn get_manifest(
        &self,
        repository: &str,
        tag: &str,
        version: &str,
    ) -> Result<ManifestResponse, Error> {
        let accepted = match version {
            "v1" => vec![
                SCHEMA1_SIGNED_MEDIA_TYPE.to_string(),
                SCHEMA1_MEDIA_TYPE.to_string(),
            ],
            "v2" => vec![SCHEMA2_MEDIA_TYPE.to_string()],
            other => {
                return Err(Error::BadRequest(format!(
                    "version {other} is not supported, use v1 or v2"
                )))
            }
        };

        self.ensure_project(repository).await?;

        let pulled = self
            .registry
            .pull_manifest(repository, &Reference::Tag(tag.to_string()), &accepted)
            .await?;

        let decoded = ImageManifest::from_slice(pulled.media_type.as_deref(), &pulled.payload)?;
        let manifest = serde_json::from_slice(&pulled.payload).map_err(|error| {
            Error::DataCorruption(format!("manifest of {repository}:{tag}: {error}"))
        })?;

        let config = match &decoded {
            ImageManifest::Schema2(schema2) if version == "v2" => {
                let blob = self
                    .registry
                    .pull_blob(repository, &schema2.config.digest)
                    .await?;
                Some(String::from_utf8(blob.to_vec())?)
            }
            _ => None,
        };

        Ok(ManifestResponse { manifest, config })
    }

    /// Deletes `tag`, or every tag of `repository` when `tag` is `None`.
    ///
    /// Nothing is deleted when one of the tags is signed in the trust service.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        repository: &str,
        tag: Option<&str>,
        actor: &str,
    ) -> Result<DeleteOutcome, Error> {
        let project = self.ensure_project(repository).await?;

        let tags = match tag {
            Some(tag) => vec![tag.to_string()],
            None => self.aggregator.list_tag_names(repository).await?,
        };

        if tags.is_empty() {
            return Err(Error::NotFound(format!(
                "no tags found for repository {repository}"
            )));
        }

        if self.trust.is_some() {
            self.refuse_signed_tags(repository, &tags, actor).await?;
        }

        let mut outcome = DeleteOutcome::default();
        for tag in tags {
            match self.registry.delete_tag(repository, &tag).await {
                Ok(()) => {}
                Err(error) if error.is_upstream_not_found() => {
                    warn!("Tag {repository}:{tag} not found in the registry, skipping");
                    continue;
                }
                Err(error) => return Err(error),
            }

            info!("Deleted tag {repository}:{tag}");
            self.emit_tag_deleted(TagDeletedEvent {
                repository: repository.to_string(),
                project: project.clone(),
                tag: tag.clone(),
                actor: actor.to_string(),
                occurred_at: Utc::now(),
            });
            outcome.deleted.push(tag);
        }

        outcome.repository_removed = self
            .aggregator
            .list_tag_names(repository)
            .await?
            .is_empty();
        if outcome.repository_removed {
            info!("Repository {repository} has no tag left");
        }

        Ok(outcome)
    }

    async fn refuse_signed_tags(
        &self,
        repository: &str,
        tags: &[String],
        actor: &str,
    ) -> Result<(), Error> {
        let signatures = self.aggregator.signatures(repository, actor).await?;
        if signatures.is_empty() {
            return Ok(());
        }

        for tag in tags {
            let reference = Reference::Tag(tag.clone());
            let Some(digest) = self.registry.manifest_exists(repository, &reference).await? else {
                continue;
            };

            if signatures.find(tag, &digest)?.is_some() {
                warn!("Refusing to delete signed tag {repository}:{tag}");
                return Err(Error::PolicyDenied(PolicyViolation::SignedTag(tag.clone())));
            }
        }

        Ok(())
    }

    fn emit_tag_deleted(&self, event: TagDeletedEvent) {
        let Some(task_queue) = &self.task_queue else {
            return;
        };

        let event_id = Uuid::new_v4();
        for (index, sink) in self.sinks.iter().enumerate() {
            let sink = sink.clone();
            let event = event.clone();
            let reference = format!("tag-deleted-{event_id}-{index}");

            let submitted =
                task_queue.submit(&reference, async move { sink.tag_deleted(&event).await });
            if let Err(error) = submitted {
                error!("Unable to queue deletion event {reference}: {error}");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn signatures(
        &self,
        repository: &str,
        actor: &str,
    ) -> Result<Vec<SignedTarget>, Error> {
        self.ensure_project(repository).await?;

        let Some(trust) = &self.trust else {
            return Err(Error::ServiceUnavailable(
                "no trust service is configured".to_string(),
            ));
        };

        trust.list_targets(actor, repository).await
    }

    /// Asks the scanner to scan the image currently behind `tag`.
    #[instrument(skip(self))]
    pub async fn scan(&self, repository: &str, tag: &str) -> Result<(), Error> {
        let Some(scan_trigger) = &self.scan_trigger else {
            warn!("No scanner is configured, scan of {repository}:{tag} refused");
            return Err(Error::ServiceUnavailable(
                "no scanner is configured".to_string(),
            ));
        };

        self.ensure_project(repository).await?;

        let reference = Reference::Tag(tag.to_string());
        let Some(digest) = self.registry.manifest_exists(repository, &reference).await? else {
            return Err(Error::NotFound(format!("{tag} not found")));
        };

        scan_trigger.trigger_scan(repository, tag, &digest).await
    }
}
