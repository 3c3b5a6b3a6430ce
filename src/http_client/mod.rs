mod auth;
mod bearer_token;
mod response_ext;

use crate::configuration;
use crate::error::Error;
use auth::AuthenticationScheme;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bearer_token::BearerToken;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

pub use response_ext::{read_body, upstream_error, ResponseExt};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub server_ca_bundle: Option<String>,
    #[serde(default)]
    pub client_certificate: Option<String>,
    #[serde(default)]
    pub client_private_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_redirect: Option<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub accept: Vec<String>,
    /// Account announced to the token service, used to scope trust data per user.
    pub account: Option<String>,
    pub json_body: Option<Vec<u8>>,
}

impl RequestOptions {
    pub fn accept(media_types: &[String]) -> Self {
        Self {
            accept: media_types.to_vec(),
            ..Self::default()
        }
    }

    pub fn json(body: Vec<u8>) -> Self {
        Self {
            json_body: Some(body),
            ..Self::default()
        }
    }

    pub fn with_account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }
}

/// HTTP(S) client shared by every upstream backend.
///
/// Follows redirects and answers `401` challenges once, either with basic credentials or
/// with a bearer token obtained from the realm announced by the upstream.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    max_redirect: u8,
    basic_auth: Option<(String, String)>,
    tokens: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, configuration::Error> {
        let client = Client::builder(TokioExecutor::new()).build(https_connector(config)?);

        let basic_auth = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Username and password must be both provided");
                None
            }
            _ => None,
        };

        Ok(Self {
            client,
            max_redirect: config.max_redirect.unwrap_or(5),
            basic_auth,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    #[instrument(skip(self, options))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response<Incoming>, Error> {
        let mut uri: Uri = url.parse()?;
        let mut redirects = 0;

        loop {
            let token_key = token_key(&uri, options.account.as_deref());
            let authorization = self.cached_token(&token_key).await;

            let request = self.build_request(&method, &uri, options, authorization.as_deref())?;
            let response = self.client.request(request).await?;

            if response.status().is_redirection() {
                if redirects >= self.max_redirect {
                    return Err(Error::Internal("Too many redirects".to_string()));
                }

                let location = response
                    .get_header(LOCATION)
                    .ok_or_else(|| Error::Internal("Missing Location header".to_string()))?;

                uri = resolve_location(&uri, &location)?;
                redirects += 1;
                continue;
            }

            if response.status() == StatusCode::UNAUTHORIZED {
                let (token, ttl) = self
                    .authenticate(&response, options.account.as_deref())
                    .await?;
                self.store_token(token_key, &token, ttl).await;

                let request = self.build_request(&method, &uri, options, Some(&token))?;
                return Ok(self.client.request(request).await?);
            }

            return Ok(response);
        }
    }

    fn build_request(
        &self,
        method: &Method,
        uri: &Uri,
        options: &RequestOptions,
        authorization: Option<&str>,
    ) -> Result<Request<Full<Bytes>>, Error> {
        let mut builder = Request::builder().method(method).uri(uri);

        for media_type in &options.accept {
            builder = builder.header(ACCEPT, media_type);
        }

        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, HeaderValue::from_str(authorization)?);
        }

        let body = match &options.json_body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(body.clone()))
            }
            None => Full::new(Bytes::new()),
        };

        Ok(builder.body(body)?)
    }

    async fn cached_token(&self, key: &str) -> Option<String> {
        let tokens = self.tokens.read().await;
        match tokens.get(key) {
            Some((token, expires_at)) if *expires_at > Instant::now() => Some(token.clone()),
            _ => None,
        }
    }

    async fn store_token(&self, key: String, token: &str, ttl: u64) {
        let mut tokens = self.tokens.write().await;
        let now = Instant::now();
        tokens.retain(|_, (_, expires_at)| *expires_at > now);
        tokens.insert(key, (token.to_string(), now + Duration::from_secs(ttl)));
    }

    async fn authenticate(
        &self,
        response: &Response<Incoming>,
        account: Option<&str>,
    ) -> Result<(String, u64), Error> {
        let auth_header = response
            .get_header(WWW_AUTHENTICATE)
            .ok_or_else(|| Error::Upstream {
                status: StatusCode::UNAUTHORIZED,
                detail: "Missing WWW-Authenticate header".to_string(),
            })?;

        match AuthenticationScheme::from_www_authenticate_header(&auth_header)? {
            AuthenticationScheme::Bearer(realm, mut params) => {
                if let Some(account) = account {
                    params.insert("account".to_string(), account.to_string());
                }
                let query = serde_urlencoded::to_string(&params).map_err(|error| {
                    Error::Internal(format!("Unable to encode token request: {error}"))
                })?;

                let separator = if realm.contains('?') { '&' } else { '?' };
                let mut request = Request::builder()
                    .method(Method::GET)
                    .uri(format!("{realm}{separator}{query}"));

                if let Some(basic) = self.basic_authorization() {
                    request = request.header(AUTHORIZATION, basic);
                }

                debug!("Requesting bearer token from {realm}");
                let response = self
                    .client
                    .request(request.body(Full::new(Bytes::new()))?)
                    .await?;

                if !response.status().is_success() {
                    return Err(Error::Upstream {
                        status: response.status(),
                        detail: "Token acquisition failed".to_string(),
                    });
                }

                let body = read_body(response).await?;
                let bearer = BearerToken::from_slice(&body)?;
                Ok((format!("Bearer {}", bearer.token()?), bearer.ttl()))
            }
            AuthenticationScheme::Basic => {
                let basic = self.basic_authorization().ok_or_else(|| Error::Upstream {
                    status: StatusCode::UNAUTHORIZED,
                    detail: "Basic auth required but not configured".to_string(),
                })?;
                Ok((basic, 3600))
            }
        }
    }

    fn basic_authorization(&self) -> Option<String> {
        self.basic_auth.as_ref().map(|(user, pass)| {
            let encoded = BASE64_STANDARD.encode(format!("{user}:{pass}"));
            format!("Basic {encoded}")
        })
    }
}

fn token_key(uri: &Uri, account: Option<&str>) -> String {
    let authority = uri.authority().map(|a| a.as_str()).unwrap_or_default();
    match account {
        Some(account) => format!("{authority}#{account}"),
        None => authority.to_string(),
    }
}

fn resolve_location(current: &Uri, location: &str) -> Result<Uri, Error> {
    let location: Uri = location.parse()?;
    if location.authority().is_some() {
        return Ok(location);
    }

    let mut parts = current.clone().into_parts();
    parts.path_and_query = location.path_and_query().cloned();
    Uri::from_parts(parts).map_err(|error| Error::Internal(format!("Invalid redirect: {error}")))
}

/// Connector honoring the CA bundle and client certificate of `config`.
pub fn https_connector(
    config: &ClientConfig,
) -> Result<HttpsConnector<HttpConnector>, configuration::Error> {
    let tls_config = build_tls_config(
        config.server_ca_bundle.as_deref(),
        config.client_certificate.as_deref(),
        config.client_private_key.as_deref(),
    )?;

    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .build())
}

fn build_tls_config(
    ca_bundle: Option<&str>,
    client_cert: Option<&str>,
    client_key: Option<&str>,
) -> Result<rustls::ClientConfig, configuration::Error> {
    let mut root_store = RootCertStore::empty();

    let certs = if let Some(bundle) = ca_bundle {
        CertificateDer::pem_file_iter(bundle)?.collect::<Result<Vec<_>, _>>()?
    } else {
        rustls_native_certs::load_native_certs().certs
    };

    root_store.add_parsable_certificates(certs);

    let config = rustls::ClientConfig::builder().with_root_certificates(root_store);

    match (client_cert, client_key) {
        (Some(cert), Some(key)) => {
            let certs = CertificateDer::pem_file_iter(cert)?.collect::<Result<Vec<_>, _>>()?;
            let key = PrivateKeyDer::from_pem_file(key)?;
            Ok(config.with_client_auth_cert(certs, key)?)
        }
        (None, None) => Ok(config.with_no_client_auth()),
        _ => {
            warn!("Client certificate and key must both be provided");
            Ok(config.with_no_client_auth())
        }
    }
}
