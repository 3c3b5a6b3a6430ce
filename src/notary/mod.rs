pub mod client;

use crate::error::Error;
use crate::oci::Digest;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tag signed in the trust service, as published in its TUF targets metadata.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SignedTarget {
    pub tag: String,
    /// Hash algorithm to base64 encoded hash of the manifest.
    pub hashes: HashMap<String, String>,
    pub length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

impl SignedTarget {
    /// The manifest digest this target was signed for.
    pub fn digest(&self) -> Result<Digest, Error> {
        let encoded = self.hashes.get("sha256").ok_or_else(|| {
            Error::DataCorruption(format!("signed target '{}' has no sha256 hash", self.tag))
        })?;

        let bytes = BASE64_STANDARD.decode(encoded)?;
        Ok(Digest::from_sha256_bytes(&bytes)?)
    }
}

/// Whether `target` was signed for the manifest `digest` under the name `tag`.
///
/// Both the digest and the tag must be equal: a signature for the same content under another
/// tag does not count.
pub fn matches(target: &SignedTarget, tag: &str, digest: &Digest) -> Result<bool, Error> {
    let target_digest = target.digest()?;
    Ok(&target_digest == digest && target.tag == tag)
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Signed targets of `repository`, as visible to `actor`.
    async fn list_targets(&self, actor: &str, repository: &str)
        -> Result<Vec<SignedTarget>, Error>;
}

/// Signed targets of one repository keyed by manifest digest.
///
/// Several tags may point to the same digest, so each entry keeps every target.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    targets: HashMap<Digest, Vec<SignedTarget>>,
}

impl SignatureIndex {
    pub fn from_targets(targets: Vec<SignedTarget>) -> Result<Self, Error> {
        let mut index: HashMap<Digest, Vec<SignedTarget>> = HashMap::new();
        for target in targets {
            index.entry(target.digest()?).or_default().push(target);
        }
        Ok(Self { targets: index })
    }

    pub async fn fetch(
        trust: &dyn TrustStore,
        actor: &str,
        repository: &str,
    ) -> Result<Self, Error> {
        Self::from_targets(trust.list_targets(actor, repository).await?)
    }

    /// The target signed for `tag` at `digest`, if any.
    pub fn find(&self, tag: &str, digest: &Digest) -> Result<Option<&SignedTarget>, Error> {
        let Some(candidates) = self.targets.get(digest) else {
            return Ok(None);
        };

        for target in candidates {
            if matches(target, tag, digest)? {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }

    pub fn contains_digest(&self, digest: &Digest) -> bool {
        self.targets.contains_key(digest)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub const BUSYBOX_DIGEST: &str =
        "sha256:1359608115b94599e5641638bac5aef1ddfaa79bb96057ebf41ebc8d33acf8a7";

    pub fn signed_target(tag: &str, sha256_base64: &str) -> SignedTarget {
        SignedTarget {
            tag: tag.to_string(),
            hashes: HashMap::from([("sha256".to_string(), sha256_base64.to_string())]),
            length: 1568,
            expiration: None,
            custom: None,
        }
    }

    pub fn busybox_target(tag: &str) -> SignedTarget {
        signed_target(tag, "E1lggRW5RZnlZBY4usWu8d36p5u5YFfr9B68jTOs+Kc=")
    }

    #[test]
    fn test_target_digest() {
        let target = busybox_target("1.0");
        assert_eq!(target.digest().unwrap().to_string(), BUSYBOX_DIGEST);
    }

    #[test]
    fn test_target_digest_corrupted() {
        let target = signed_target("1.0", "not base64!");
        assert!(matches!(target.digest(), Err(Error::DataCorruption(_))));

        let target = signed_target("1.0", "E1lggRW5RZnl");
        assert!(matches!(target.digest(), Err(Error::DataCorruption(_))));

        let mut target = busybox_target("1.0");
        target.hashes.clear();
        assert!(matches!(target.digest(), Err(Error::DataCorruption(_))));
    }

    #[test]
    fn test_matches() {
        let target = busybox_target("1.0");
        let digest: Digest = BUSYBOX_DIGEST.parse().unwrap();
        let other: Digest =
            "sha256:1359608115b94599e5641638bac5aef1ddfaa79bb96057ebf41ebc8d33acf8a8"
                .parse()
                .unwrap();

        assert_eq!(matches(&target, "1.0", &digest), Ok(true));
        assert_eq!(matches(&target, "1.0", &other), Ok(false));
        assert_eq!(matches(&target, "2.0", &digest), Ok(false));
    }

    #[test]
    fn test_matches_corrupted_target() {
        let target = signed_target("1.0", "%%%");
        let digest: Digest = BUSYBOX_DIGEST.parse().unwrap();
        assert!(super::matches(&target, "1.0", &digest).is_err());
    }

    #[test]
    fn test_index_shared_digest() {
        let index =
            SignatureIndex::from_targets(vec![busybox_target("1.0"), busybox_target("latest")])
                .unwrap();
        let digest: Digest = BUSYBOX_DIGEST.parse().unwrap();

        assert!(index.contains_digest(&digest));
        assert_eq!(index.find("latest", &digest).unwrap().unwrap().tag, "latest");
        assert_eq!(index.find("1.0", &digest).unwrap().unwrap().tag, "1.0");
        assert!(index.find("2.0", &digest).unwrap().is_none());
    }

    #[test]
    fn test_index_rejects_corrupted_target() {
        let result = SignatureIndex::from_targets(vec![signed_target("1.0", "%%%")]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_index_fetch_passes_actor() {
        let mut trust = MockTrustStore::new();
        trust
            .expect_list_targets()
            .withf(|actor, repository| actor == "admin" && repository == "notary-demo/busybox")
            .returning(|_, _| Ok(vec![busybox_target("1.0")]));

        let index = SignatureIndex::fetch(&trust, "admin", "notary-demo/busybox")
            .await
            .unwrap();
        assert!(!index.is_empty());
    }
}
