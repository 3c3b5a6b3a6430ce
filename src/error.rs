use crate::scan::Severity;
use crate::task_queue;
use hyper::header::InvalidHeaderValue;
use hyper::http::uri::InvalidUri;
use hyper::StatusCode;
use std::fmt::Display;
use std::string::FromUtf8Error;
use tracing::{debug, error, warn};

/// Reason a request was refused by policy rather than by a failure.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyViolation {
    NotSigned,
    Unscanned,
    VulnerabilityTooHigh {
        severity: Severity,
        threshold: Severity,
    },
    SignedTag(String),
}

impl PolicyViolation {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            PolicyViolation::NotSigned => "not_signed",
            PolicyViolation::Unscanned => "unscanned",
            PolicyViolation::VulnerabilityTooHigh { .. } => "vulnerable",
            PolicyViolation::SignedTag(_) => "signed_tag",
        }
    }
}

impl Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::NotSigned => write!(f, "the image is not signed in Notary"),
            PolicyViolation::Unscanned => {
                write!(f, "the image has no finished vulnerability scan")
            }
            PolicyViolation::VulnerabilityTooHigh {
                severity,
                threshold,
            } => write!(
                f,
                "the image severity {severity} is at or above the project threshold {threshold}"
            ),
            PolicyViolation::SignedTag(tag) => write!(f, "tag {tag} is signed"),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    NotFound(String),
    BadRequest(String),
    PolicyDenied(PolicyViolation),
    Upstream { status: StatusCode, detail: String },
    DataCorruption(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::PolicyDenied(_) => StatusCode::PRECONDITION_FAILED,
            Error::Upstream { status, .. } => *status,
            Error::DataCorruption(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::PolicyDenied(_) => "DENIED",
            Error::Upstream { .. } => "UPSTREAM_ERROR",
            Error::DataCorruption(_) => "DATA_CORRUPTION",
            Error::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Error::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn is_upstream_not_found(&self) -> bool {
        matches!(self, Error::Upstream { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(s) => write!(f, "not found: {s}"),
            Error::BadRequest(s) => write!(f, "bad request: {s}"),
            Error::PolicyDenied(violation) => write!(f, "denied by policy: {violation}"),
            Error::Upstream { status, detail } if detail.is_empty() => {
                write!(f, "upstream error: {status}")
            }
            Error::Upstream { status, detail } => write!(f, "upstream error: {status}: {detail}"),
            Error::DataCorruption(s) => write!(f, "data corruption: {s}"),
            Error::ServiceUnavailable(s) => write!(f, "service unavailable: {s}"),
            Error::Internal(s) => write!(f, "internal server error: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::convert::Infallible> for Error {
    fn from(error: std::convert::Infallible) -> Self {
        match error {}
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        debug!("I/O error: {error:?}");
        Error::Internal("I/O error during operations".to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(error: hyper::Error) -> Self {
        debug!("Hyper error: {error:?}");
        Error::Internal("HTTP error during operations".to_string())
    }
}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        debug!("Hyper HTTP error: {error:?}");
        Error::Internal("HTTP error during operations".to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for Error {
    fn from(error: hyper_util::client::legacy::Error) -> Self {
        warn!("HTTP client error: {error:?}");
        Error::Internal("HTTP request to upstream failed".to_string())
    }
}

impl From<InvalidUri> for Error {
    fn from(error: InvalidUri) -> Self {
        debug!("Invalid URI: {error:?}");
        Error::Internal("Invalid upstream URI".to_string())
    }
}

impl From<InvalidHeaderValue> for Error {
    fn from(error: InvalidHeaderValue) -> Self {
        debug!("Invalid header value: {error:?}");
        Error::Internal("Invalid header value".to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Serde JSON error: {error:?}");
        Error::Internal("(De)Serialization error during operations".to_string())
    }
}

impl From<FromUtf8Error> for Error {
    fn from(error: FromUtf8Error) -> Self {
        debug!("UTF-8 error: {error:?}");
        Error::DataCorruption("invalid UTF-8 content".to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(error: base64::DecodeError) -> Self {
        debug!("Base64 error: {error:?}");
        Error::DataCorruption("invalid base64 content".to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(error: redis::RedisError) -> Self {
        error!("Redis error: {error:?}");
        Error::Internal("Redis error during operations".to_string())
    }
}

impl From<task_queue::Error> for Error {
    fn from(error: task_queue::Error) -> Self {
        error!("Task queue error: {error}");
        Error::Internal("Unable to schedule background task".to_string())
    }
}

impl From<crate::oci::Error> for Error {
    fn from(error: crate::oci::Error) -> Self {
        debug!("OCI format error: {error}");
        Error::DataCorruption(error.to_string())
    }
}
