use crate::configuration;
use crate::error::Error;
use crate::http_client::{https_connector, ClientConfig};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONNECTION, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, instrument, warn};

/// Relays requests to the upstream registry, streaming bodies in both directions.
#[derive(Clone, Debug)]
pub struct Forwarder {
    client: Client<HttpsConnector<HttpConnector>, Incoming>,
    scheme: Scheme,
    authority: Authority,
}

impl Forwarder {
    pub fn new(url: &str, config: &ClientConfig) -> Result<Self, configuration::Error> {
        let upstream: Uri = url.parse().map_err(|error| {
            configuration::Error::InvalidValue(format!(
                "invalid registry url '{url}': {error}"
            ))
        })?;

        let (Some(scheme), Some(authority)) = (upstream.scheme(), upstream.authority()) else {
            return Err(configuration::Error::InvalidValue(format!(
                "registry url '{url}' must be absolute"
            )));
        };

        let client = Client::builder(TokioExecutor::new()).build(https_connector(config)?);

        Ok(Self {
            client,
            scheme: scheme.clone(),
            authority: authority.clone(),
        })
    }

    fn upstream_uri(&self, uri: &Uri) -> Result<Uri, Error> {
        let path_and_query = uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(Error::from)
    }

    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn forward(&self, request: Request<Incoming>) -> Result<Response<Incoming>, Error> {
        let (mut parts, body) = request.into_parts();

        parts.uri = self.upstream_uri(&parts.uri)?;
        parts.headers.remove(CONNECTION);
        parts
            .headers
            .insert(HOST, HeaderValue::from_str(self.authority.as_str())?);

        debug!("Forwarding to {}", parts.uri);
        self.client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|error| {
                warn!("Registry unreachable: {error}");
                Error::Upstream {
                    status: StatusCode::BAD_GATEWAY,
                    detail: "registry unreachable".to_string(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(url: &str) -> Result<Forwarder, configuration::Error> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        Forwarder::new(url, &ClientConfig::default())
    }

    #[test]
    fn test_upstream_uri() {
        let forwarder = forwarder("http://registry:5000").unwrap();

        let uri = forwarder
            .upstream_uri(&"/v2/library/ubuntu/manifests/14.04".parse().unwrap())
            .unwrap();
        assert_eq!(
            uri.to_string(),
            "http://registry:5000/v2/library/ubuntu/manifests/14.04"
        );

        let uri = forwarder
            .upstream_uri(&"http://gateway.local/v2/_catalog?n=10".parse().unwrap())
            .unwrap();
        assert_eq!(uri.to_string(), "http://registry:5000/v2/_catalog?n=10");
    }

    #[test]
    fn test_relative_url_is_rejected() {
        assert!(forwarder("/v2").is_err());
    }
}
