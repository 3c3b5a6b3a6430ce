use crate::error::Error;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::header::{AsHeaderName, LINK};
use hyper::Response;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static NEXT_LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<(?P<url>[^>]+)>\s*;\s*rel="?next"?"#).unwrap());

pub trait ResponseExt {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName;

    /// Target of the `rel="next"` entry of the `Link` header, if any.
    fn next_link(&self) -> Option<String>;
}

impl<B> ResponseExt for Response<B> {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName,
    {
        self.headers()
            .get(header)
            .and_then(|header| header.to_str().ok())
            .map(ToString::to_string)
    }

    fn next_link(&self) -> Option<String> {
        let link = self.get_header(LINK)?;
        NEXT_LINK_REGEX
            .captures(&link)
            .map(|captures| captures["url"].to_string())
    }
}

pub async fn read_body<B>(response: Response<B>) -> Result<Bytes, Error>
where
    B: Body,
    Error: From<B::Error>,
{
    Ok(response.into_body().collect().await?.to_bytes())
}

/// Turns a non-success response into an `Error::Upstream`, keeping the body as detail.
pub async fn upstream_error<B>(response: Response<B>) -> Error
where
    B: Body,
    Error: From<B::Error>,
{
    let status = response.status();
    let detail = match read_body(response).await {
        Ok(body) => String::from_utf8_lossy(&body).trim().to_string(),
        Err(error) => {
            debug!("Unable to read upstream error body: {error}");
            String::new()
        }
    };

    Error::Upstream { status, detail }
}
