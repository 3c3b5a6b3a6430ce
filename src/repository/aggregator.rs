use crate::error::Error;
use crate::notary::{SignatureIndex, TrustStore};
use crate::oci::manifest::accepted_media_types;
use crate::oci::{ImageConfig, ImageManifest, Reference};
use crate::registry::RegistryClient;
use crate::repository::model::{Tag, TagResponse};
use crate::scan::{resolve_overview, ScanOverview, ScanStore};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Combines registry metadata, signatures and scan results into tag descriptions.
#[derive(Clone)]
pub struct Aggregator {
    registry: Arc<dyn RegistryClient>,
    trust: Option<Arc<dyn TrustStore>>,
    scans: Option<Arc<dyn ScanStore>>,
}

impl Aggregator {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            trust: None,
            scans: None,
        }
    }

    pub fn with_trust(mut self, trust: Arc<dyn TrustStore>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn with_scans(mut self, scans: Arc<dyn ScanStore>) -> Self {
        self.scans = Some(scans);
        self
    }

    /// Describes every tag of `tags`, in the same order.
    ///
    /// Fails as a whole when the manifest or configuration of any tag cannot be read.
    #[instrument(skip(self, tags))]
    pub async fn assemble(
        &self,
        repository: &str,
        tags: &[String],
        actor: &str,
    ) -> Result<Vec<TagResponse>, Error> {
        let mut details = Vec::with_capacity(tags.len());
        for tag in tags {
            details.push(self.detailed_tag(repository, tag).await?);
        }

        let signatures = self.signatures(repository, actor).await?;

        let mut responses = Vec::with_capacity(details.len());
        for tag in details {
            let scan_overview = self.scan_overview(&tag).await;
            let signature = signatures.find(&tag.name, &tag.digest)?.cloned();

            responses.push(TagResponse {
                tag,
                signature,
                scan_overview,
            });
        }

        Ok(responses)
    }

    /// Reads the image metadata of `tag` from its manifest.
    pub async fn detailed_tag(&self, repository: &str, tag: &str) -> Result<Tag, Error> {
        let pulled = self
            .registry
            .pull_manifest(
                repository,
                &Reference::Tag(tag.to_string()),
                &accepted_media_types(),
            )
            .await?;

        let manifest = ImageManifest::from_slice(pulled.media_type.as_deref(), &pulled.payload)?;
        let config = match &manifest {
            ImageManifest::Schema2(manifest) => {
                let blob = self
                    .registry
                    .pull_blob(repository, &manifest.config.digest)
                    .await?;
                ImageConfig::from_slice(&blob)?
            }
            ImageManifest::Schema1(manifest) => manifest.config()?,
        };

        Ok(Tag::new(tag, pulled.digest, config))
    }

    /// Signed targets of `repository`, empty when no trust service is configured.
    pub async fn signatures(&self, repository: &str, actor: &str) -> Result<SignatureIndex, Error> {
        match &self.trust {
            Some(trust) => SignatureIndex::fetch(trust.as_ref(), actor, repository).await,
            None => Ok(SignatureIndex::default()),
        }
    }

    async fn scan_overview(&self, tag: &Tag) -> Option<ScanOverview> {
        let scans = self.scans.as_ref()?;
        match resolve_overview(scans.as_ref(), &tag.digest).await {
            Ok(overview) => overview,
            Err(error) => {
                error!(
                    "Unable to read the scan overview of {} ({}): {error}",
                    tag.name, tag.digest
                );
                None
            }
        }
    }

    /// Tag names of `repository`, sorted. A repository unknown to the registry has no tags.
    pub async fn list_tag_names(&self, repository: &str) -> Result<Vec<String>, Error> {
        let mut tags = match self.registry.list_tags(repository).await {
            Ok(tags) => tags,
            Err(error) if error.is_upstream_not_found() => {
                debug!("Repository {repository} is unknown to the registry");
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        tags.sort();
        Ok(tags)
    }
}
