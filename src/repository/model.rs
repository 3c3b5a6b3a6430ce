use crate::notary::SignedTarget;
use crate::oci::{Digest, ImageConfig};
use crate::scan::ScanOverview;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Image metadata of one tag, read from its manifest and image configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Tag {
    pub digest: Digest,
    pub name: String,
    pub architecture: String,
    pub os: String,
    pub docker_version: String,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
}

impl Tag {
    pub fn new(name: &str, digest: Digest, config: ImageConfig) -> Self {
        Self {
            digest,
            name: name.to_string(),
            architecture: config.architecture,
            os: config.os,
            docker_version: config.docker_version,
            author: config.author,
            created: config.created,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TagResponse {
    #[serde(flatten)]
    pub tag: Tag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignedTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_overview: Option<ScanOverview>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RepositorySummary {
    pub name: String,
    pub project: String,
    pub tags_count: usize,
}

/// A manifest as stored by the registry, with the configuration blob of schema2 images.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManifestResponse {
    pub manifest: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub repository_removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_response_omits_absent_metadata() {
        let digest: Digest =
            "sha256:1359608115b94599e5641638bac5aef1ddfaa79bb96057ebf41ebc8d33acf8a7"
                .parse()
                .unwrap();
        let config = ImageConfig {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            ..ImageConfig::default()
        };

        let response = TagResponse {
            tag: Tag::new("1.0", digest, config),
            signature: None,
            scan_overview: None,
        };

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "digest": "sha256:1359608115b94599e5641638bac5aef1ddfaa79bb96057ebf41ebc8d33acf8a7",
                "name": "1.0",
                "architecture": "amd64",
                "os": "linux",
                "docker_version": "",
                "author": "",
                "created": null
            })
        );
    }
}
