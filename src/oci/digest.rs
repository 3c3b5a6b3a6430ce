use crate::oci::Error;
use regex::Regex;
use serde::de::Visitor;
use serde::{de, Deserialize, Deserializer, Serialize};
use sha2::Sha256;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::LazyLock;

static DIGEST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<algorithm>[a-z0-9]+):(?P<hash>[a-f0-9]{64})$").unwrap());

#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum Digest {
    Sha256(String),
}

impl Digest {
    /// Digest of `content` as computed by the registry.
    pub fn sha256_of(content: &[u8]) -> Self {
        use sha2::Digest as _;

        let hash = Sha256::digest(content);
        Digest::Sha256(hex::encode(hash))
    }

    /// Builds a digest from raw sha256 bytes, as recorded by trust metadata.
    pub fn from_sha256_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 32 {
            return Err(Error::InvalidFormat(format!(
                "sha256 hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Digest::Sha256(hex::encode(bytes)))
    }

    pub fn algorithm(&self) -> &str {
        match self {
            Digest::Sha256(_) => "sha256",
        }
    }

    pub fn hash(&self) -> &str {
        match self {
            Digest::Sha256(s) => s,
        }
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = DIGEST_REGEX
            .captures(s)
            .ok_or_else(|| Error::InvalidFormat(format!("Invalid digest: '{s}'")))?;

        match &captures["algorithm"] {
            "sha256" => Ok(Digest::Sha256(captures["hash"].to_string())),
            algorithm => Err(Error::InvalidFormat(format!(
                "Unsupported digest algorithm: '{algorithm}'"
            ))),
        }
    }
}

impl TryFrom<&str> for Digest {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm(), self.hash())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Digest, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DigestVisitor;

        impl Visitor<'_> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
                formatter.write_str("a valid digest string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Digest, E>
            where
                E: de::Error,
            {
                Digest::from_str(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(DigestVisitor)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
