pub mod client;

use crate::error::Error;
use crate::oci::{Digest, Reference};
use async_trait::async_trait;
use hyper::body::Bytes;

pub use client::HttpRegistryClient;

pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

#[derive(Clone, Debug, PartialEq)]
pub struct PulledManifest {
    pub digest: Digest,
    pub media_type: Option<String>,
    pub payload: Vec<u8>,
}

/// Docker Registry HTTP API v2 operations used to mediate and describe images.
///
/// Error responses of the registry are reported as `Error::Upstream` with the registry status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn catalog(&self) -> Result<Vec<String>, Error>;

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, Error>;

    /// Digest of the manifest behind `reference`, `None` when the registry does not know it.
    async fn manifest_exists(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> Result<Option<Digest>, Error>;

    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &Reference,
        accepted: &[String],
    ) -> Result<PulledManifest, Error>;

    async fn pull_blob(&self, repository: &str, digest: &Digest) -> Result<Bytes, Error>;

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<(), Error>;
}
