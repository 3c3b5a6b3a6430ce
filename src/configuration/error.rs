use opentelemetry_otlp::ExporterBuildError;
use rustls_pki_types::pem;
use std::{fmt, io};
use tracing::debug;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    ConfigurationFileFormat(String),
    InvalidValue(String),
    /// An upstream backend could not be set up from its section.
    Backend(String),
    Tls(String),
    Tracing(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "unable to read configuration: {err}"),
            Error::ConfigurationFileFormat(err) => write!(f, "malformed configuration: {err}"),
            Error::InvalidValue(err) => write!(f, "invalid configuration value: {err}"),
            Error::Backend(err) => write!(f, "unable to set up backend: {err}"),
            Error::Tls(err) => write!(f, "TLS setup failed: {err}"),
            Error::Tracing(err) => write!(f, "tracing setup failed: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        debug!("TOML error: {err}");
        Error::ConfigurationFileFormat(err.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<pem::Error> for Error {
    fn from(err: pem::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<ExporterBuildError> for Error {
    fn from(err: ExporterBuildError) -> Self {
        Error::Tracing(err.to_string())
    }
}

impl From<crate::error::Error> for Error {
    fn from(err: crate::error::Error) -> Self {
        debug!("Backend error: {err}");
        Error::Backend(err.to_string())
    }
}
