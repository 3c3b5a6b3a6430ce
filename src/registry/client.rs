use crate::error::Error;
use crate::http_client::{read_body, upstream_error, HttpClient, RequestOptions, ResponseExt};
use crate::oci::manifest::accepted_media_types;
use crate::oci::{Digest, Reference};
use crate::registry::{PulledManifest, RegistryClient, DOCKER_CONTENT_DIGEST};
use async_trait::async_trait;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument};

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagsListResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct HttpRegistryClient {
    client: HttpClient,
    url: String,
}

impl HttpRegistryClient {
    pub fn new(client: HttpClient, url: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!("{}/v2/{repository}/manifests/{reference}", self.url)
    }

    fn blob_url(&self, repository: &str, digest: &Digest) -> String {
        format!("{}/v2/{repository}/blobs/{digest}", self.url)
    }

    /// `Link` targets are usually relative to the registry root.
    fn absolute(&self, link: &str) -> String {
        if link.starts_with('/') {
            format!("{}{link}", self.url)
        } else {
            link.to_string()
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response<Incoming>, Error> {
        let response = self.client.request(method, url, options).await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        Ok(response)
    }

    async fn paginate<T, F>(&self, first_page: String, mut extract: F) -> Result<Vec<String>, Error>
    where
        T: for<'de> Deserialize<'de>,
        F: FnMut(T) -> Vec<String>,
    {
        let mut items = Vec::new();
        let mut next = Some(first_page);

        while let Some(url) = next {
            let response = self.send(Method::GET, &url, &RequestOptions::default()).await?;
            next = response.next_link().map(|link| self.absolute(&link));

            let body = read_body(response).await?;
            let page: T = serde_json::from_slice(&body).map_err(|error| {
                Error::DataCorruption(format!("invalid registry listing: {error}"))
            })?;
            items.extend(extract(page));
        }

        Ok(items)
    }

    fn response_digest(response: &Response<Incoming>) -> Result<Option<Digest>, Error> {
        Ok(response
            .get_header(DOCKER_CONTENT_DIGEST)
            .map(|digest| digest.parse::<Digest>())
            .transpose()?)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    #[instrument(skip(self))]
    async fn catalog(&self) -> Result<Vec<String>, Error> {
        let url = format!("{}/v2/_catalog?n={PAGE_SIZE}", self.url);
        self.paginate(url, |page: CatalogResponse| page.repositories)
            .await
    }

    #[instrument(skip(self))]
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, Error> {
        let url = format!("{}/v2/{repository}/tags/list?n={PAGE_SIZE}", self.url);
        self.paginate(url, |page: TagsListResponse| page.tags.unwrap_or_default())
            .await
    }

    #[instrument(skip(self))]
    async fn manifest_exists(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> Result<Option<Digest>, Error> {
        let options = RequestOptions::accept(&accepted_media_types());
        let response = self
            .client
            .request(
                Method::HEAD,
                &self.manifest_url(repository, &reference.to_string()),
                &options,
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        if let Some(digest) = Self::response_digest(&response)? {
            return Ok(Some(digest));
        }

        match reference {
            Reference::Digest(digest) => Ok(Some(digest.clone())),
            Reference::Tag(_) => {
                debug!("Registry did not return a digest, pulling {repository}:{reference}");
                let manifest = self
                    .pull_manifest(repository, reference, &accepted_media_types())
                    .await?;
                Ok(Some(manifest.digest))
            }
        }
    }

    #[instrument(skip(self, accepted))]
    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &Reference,
        accepted: &[String],
    ) -> Result<PulledManifest, Error> {
        let response = self
            .send(
                Method::GET,
                &self.manifest_url(repository, &reference.to_string()),
                &RequestOptions::accept(accepted),
            )
            .await?;

        let header_digest = Self::response_digest(&response)?;
        let media_type = response.get_header(CONTENT_TYPE);
        let payload = read_body(response).await?.to_vec();

        let digest = header_digest.unwrap_or_else(|| Digest::sha256_of(&payload));

        Ok(PulledManifest {
            digest,
            media_type,
            payload,
        })
    }

    #[instrument(skip(self))]
    async fn pull_blob(&self, repository: &str, digest: &Digest) -> Result<Bytes, Error> {
        let response = self
            .send(
                Method::GET,
                &self.blob_url(repository, digest),
                &RequestOptions::default(),
            )
            .await?;

        read_body(response).await
    }

    #[instrument(skip(self))]
    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<(), Error> {
        let reference = Reference::Tag(tag.to_string());
        let Some(digest) = self.manifest_exists(repository, &reference).await? else {
            return Err(Error::Upstream {
                status: StatusCode::NOT_FOUND,
                detail: format!("tag {tag} not found in {repository}"),
            });
        };

        self.send(
            Method::DELETE,
            &self.manifest_url(repository, &digest.to_string()),
            &RequestOptions::default(),
        )
        .await?;

        info!("Deleted manifest {digest} of {repository}:{tag}");
        Ok(())
    }
}
