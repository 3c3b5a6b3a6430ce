use crate::error::Error;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::Response;
use serde::Serialize;
use serde_json::json;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::error;

pub enum ResponseBody {
    Empty,
    Fixed(Full<Bytes>),
    Proxied(UnsyncBoxBody<Bytes, io::Error>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Empty
    }

    pub fn fixed(data: Vec<u8>) -> Self {
        ResponseBody::Fixed(Full::new(Bytes::from(data)))
    }

    /// Relays an upstream body frame by frame, trailers included.
    pub fn proxied<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ResponseBody::Proxied(body.map_err(io::Error::other).boxed_unsync())
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            ResponseBody::Empty => Poll::Ready(None),
            ResponseBody::Fixed(body) => Pin::new(body).poll_frame(cx).map_err(io::Error::other),
            ResponseBody::Proxied(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Fixed(body) => body.is_end_stream(),
            ResponseBody::Proxied(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Empty => SizeHint::with_exact(0),
            ResponseBody::Fixed(body) => body.size_hint(),
            ResponseBody::Proxied(body) => body.size_hint(),
        }
    }
}

/// Copies an upstream response as is: status, version, every header in order, and the body.
pub fn copy_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, ResponseBody::proxied(body))
}

pub fn json_response<T: Serialize>(
    status: hyper::StatusCode,
    value: &T,
) -> Result<Response<ResponseBody>, Error> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(ResponseBody::fixed(body))?)
}

/// Renders `error` as a registry style JSON error document.
///
/// Internal failures get a generic message; their details stay in the logs.
pub fn error_response<T>(error: &Error, details: T) -> Response<ResponseBody>
where
    T: Serialize,
{
    let message = match error {
        Error::Internal(_) | Error::DataCorruption(_) => {
            error!("Request failed: {error}");
            "internal server error".to_string()
        }
        _ => error.to_string(),
    };

    let body = json!({
        "errors": [{
            "code": error.code(),
            "message": message,
            "detail": details
        }]
    });

    let mut response = Response::new(ResponseBody::fixed(body.to_string().into_bytes()));
    *response.status_mut() = error.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
