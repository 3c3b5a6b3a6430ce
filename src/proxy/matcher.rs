use crate::oci::Reference;
use hyper::{Method, Uri};
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static PULL_MANIFEST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/v2/(?P<repository>.+)/manifests/(?P<reference>[^/]+)$").unwrap()
});

/// Recognizes `GET /v2/{repository}/manifests/{reference}`.
///
/// The path is matched the way the registry routes it, after percent-decoding. The repository
/// is everything before the last `/manifests/`. Scheme, host and port of the request target
/// are not considered.
pub fn match_pull_manifest(method: &Method, uri: &Uri) -> Option<(String, String)> {
    if method != Method::GET {
        return None;
    }

    let path = percent_decode_str(uri.path()).decode_utf8_lossy();
    let captures = PULL_MANIFEST_REGEX.captures(&path)?;
    Some((
        captures["repository"].to_string(),
        captures["reference"].to_string(),
    ))
}

/// The image targeted by a pull request.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageInfo {
    pub repository: String,
    pub reference: Reference,
    pub project: String,
}

impl ImageInfo {
    pub fn from_request(method: &Method, uri: &Uri, project_segments: usize) -> Option<Self> {
        let (repository, reference) = match_pull_manifest(method, uri)?;

        let reference = match reference.parse() {
            Ok(reference) => reference,
            Err(error) => {
                debug!("Not a pull of a known reference ({error}): {reference}");
                return None;
            }
        };

        Some(Self {
            project: project_of(&repository, project_segments),
            repository,
            reference,
        })
    }
}

/// The project owning `repository`: its leading path components, or the whole name when the
/// repository has a single component.
pub fn project_of(repository: &str, project_segments: usize) -> String {
    let segments: Vec<&str> = repository.split('/').collect();
    if segments.len() == 1 {
        return repository.to_string();
    }

    let count = project_segments.clamp(1, segments.len() - 1);
    segments[..count].join("/")
}
