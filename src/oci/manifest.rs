use serde::{Deserialize, Serialize};

use crate::oci::{Digest, Error};

pub const SCHEMA2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const SCHEMA1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const SCHEMA1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// Media types accepted when pulling a manifest, most preferred first.
pub fn accepted_media_types() -> Vec<String> {
    [
        SCHEMA2_MEDIA_TYPE,
        OCI_MANIFEST_MEDIA_TYPE,
        SCHEMA1_SIGNED_MEDIA_TYPE,
        SCHEMA1_MEDIA_TYPE,
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDescriptor {
    #[serde(default)]
    pub media_type: Option<String>,
    pub digest: Digest,
    #[serde(default)]
    pub size: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema2Manifest {
    pub schema_version: i32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: ConfigDescriptor,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema1History {
    pub v1_compatibility: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    pub schema_version: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub history: Vec<Schema1History>,
}

impl Schema1Manifest {
    /// The image configuration recorded in the newest history entry.
    pub fn config(&self) -> Result<ImageConfig, Error> {
        let Some(latest) = self.history.first() else {
            return Err(Error::InvalidFormat(
                "schema1 manifest has no history".to_string(),
            ));
        };

        ImageConfig::from_slice(latest.v1_compatibility.as_bytes())
    }
}

/// A pulled manifest, decoded according to the content type returned by the registry.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageManifest {
    Schema1(Schema1Manifest),
    Schema2(Schema2Manifest),
}

impl ImageManifest {
    pub fn from_slice(media_type: Option<&str>, payload: &[u8]) -> Result<Self, Error> {
        let media_type = media_type
            .map(|m| m.split(';').next().unwrap_or(m).trim())
            .filter(|m| !m.is_empty());

        match media_type {
            Some(SCHEMA2_MEDIA_TYPE | OCI_MANIFEST_MEDIA_TYPE) => {
                Ok(ImageManifest::Schema2(serde_json::from_slice(payload)?))
            }
            Some(SCHEMA1_MEDIA_TYPE | SCHEMA1_SIGNED_MEDIA_TYPE) => {
                Ok(ImageManifest::Schema1(serde_json::from_slice(payload)?))
            }
            Some(other) => Err(Error::UnsupportedMediaType(other.to_string())),
            None => Self::from_schema_version(payload),
        }
    }

    fn from_schema_version(payload: &[u8]) -> Result<Self, Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Versioned {
            schema_version: i32,
        }

        let versioned: Versioned = serde_json::from_slice(payload)?;
        match versioned.schema_version {
            1 => Ok(ImageManifest::Schema1(serde_json::from_slice(payload)?)),
            2 => Ok(ImageManifest::Schema2(serde_json::from_slice(payload)?)),
            v => Err(Error::InvalidFormat(format!(
                "unsupported manifest schema version {v}"
            ))),
        }
    }

    pub fn config_digest(&self) -> Option<&Digest> {
        match self {
            ImageManifest::Schema2(manifest) => Some(&manifest.config.digest),
            ImageManifest::Schema1(_) => None,
        }
    }
}

/// The subset of an image configuration surfaced for a tag.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub docker_version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created: Option<chrono::DateTime<chrono::Utc>>,
}

impl ImageConfig {
    pub fn from_slice(s: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA2: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 1510,
            "digest": "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
        },
        "layers": []
    }"#;

    const SCHEMA1: &str = r#"{
        "schemaVersion": 1,
        "name": "library/busybox",
        "tag": "1.0",
        "architecture": "amd64",
        "history": [
            {"v1Compatibility": "{\"architecture\":\"amd64\",\"os\":\"linux\",\"docker_version\":\"1.12.3\",\"author\":\"someone\",\"created\":\"2016-11-18T20:52:00Z\"}"},
            {"v1Compatibility": "{\"architecture\":\"arm\"}"}
        ]
    }"#;

    #[test]
    fn test_decode_schema2_by_media_type() {
        let manifest =
            ImageManifest::from_slice(Some(SCHEMA2_MEDIA_TYPE), SCHEMA2.as_bytes()).unwrap();

        let ImageManifest::Schema2(manifest) = &manifest else {
            panic!("expected schema2 manifest");
        };
        assert_eq!(manifest.config.size, 1510);
    }

    #[test]
    fn test_decode_schema1_by_media_type() {
        let manifest =
            ImageManifest::from_slice(Some(SCHEMA1_SIGNED_MEDIA_TYPE), SCHEMA1.as_bytes())
                .unwrap();

        let ImageManifest::Schema1(manifest) = &manifest else {
            panic!("expected schema1 manifest");
        };
        assert!(manifest.config().is_ok());
        assert_eq!(manifest.config().unwrap().docker_version, "1.12.3");
        assert_eq!(manifest.config().unwrap().os, "linux");
        assert!(manifest.config().unwrap().created.is_some());
        assert!(ImageManifest::Schema1(manifest.clone())
            .config_digest()
            .is_none());
    }

    #[test]
    fn test_decode_without_media_type_uses_schema_version() {
        let manifest = ImageManifest::from_slice(None, SCHEMA2.as_bytes()).unwrap();
        assert!(manifest.config_digest().is_some());

        let manifest = ImageManifest::from_slice(Some(""), SCHEMA1.as_bytes()).unwrap();
        assert!(matches!(manifest, ImageManifest::Schema1(_)));
    }

    #[test]
    fn test_decode_media_type_with_parameters() {
        let media_type = format!("{SCHEMA2_MEDIA_TYPE}; charset=utf-8");
        let manifest = ImageManifest::from_slice(Some(&media_type), SCHEMA2.as_bytes());
        assert!(manifest.is_ok());
    }

    #[test]
    fn test_decode_unsupported_media_type() {
        let result = ImageManifest::from_slice(
            Some("application/vnd.oci.image.index.v1+json"),
            SCHEMA2.as_bytes(),
        );
        assert_eq!(
            result,
            Err(Error::UnsupportedMediaType(
                "application/vnd.oci.image.index.v1+json".to_string()
            ))
        );
    }

    #[test]
    fn test_schema1_without_history() {
        let manifest = Schema1Manifest {
            schema_version: 1,
            name: "library/busybox".to_string(),
            tag: "1.0".to_string(),
            architecture: String::new(),
            history: Vec::new(),
        };
        assert!(manifest.config().is_err());
    }

    #[test]
    fn test_image_config_ignores_unknown_fields() {
        let config = ImageConfig::from_slice(
            br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers"}}"#,
        )
        .unwrap();
        assert_eq!(config.architecture, "amd64");
        assert_eq!(config.author, "");
        assert!(config.created.is_none());
    }
}
