use std::convert::Infallible;
use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::command::server::router::{self, Route};
use crate::command::server::{api, ServerContext};
use crate::error::Error;
use crate::metrics_provider::{IN_FLIGHT_REQUESTS, METRICS_PROVIDER};
use crate::proxy::{error_response, ResponseBody};

/// Tracks a connection in the in-flight gauge for as long as it lives.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        let count = IN_FLIGHT_REQUESTS.fetch_add(1, Ordering::Relaxed) + 1;
        Self::publish(count);
        InFlight
    }

    fn publish(count: u64) {
        METRICS_PROVIDER
            .metric_http_request_in_flight
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let count = IN_FLIGHT_REQUESTS.fetch_sub(1, Ordering::Relaxed) - 1;
        Self::publish(count);
    }
}

/// Serves one connection until it closes.
///
/// Once `timeouts[0]` elapses the connection is asked to shut down gracefully, and it is
/// dropped when `timeouts[1]` elapses as well.
pub async fn serve_request<S>(
    stream: TokioIo<S>,
    context: Arc<ServerContext>,
    timeouts: Arc<[Duration; 2]>,
) where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let _in_flight = InFlight::enter();

    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |request| handle_request(Arc::clone(&context), request)),
    );
    pin!(conn);

    for (phase, deadline) in timeouts.iter().enumerate() {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(error) = res {
                    debug!("Connection closed with error: {error}");
                }
                return;
            }
            () = tokio::time::sleep(*deadline) => {
                debug!("Connection deadline {phase} reached after {deadline:?}");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    debug!("Dropping connection past its grace period");
}

#[instrument(skip(context, request))]
async fn handle_request(
    context: Arc<ServerContext>,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    let start_time = Instant::now();
    let method = request.method().to_owned();
    let path = request.uri().path().to_owned();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = route_request(&context, request, trace_id.as_ref()).await;

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    METRICS_PROVIDER
        .metric_http_request_total
        .with_label_values(&[status.as_str()])
        .inc();
    METRICS_PROVIDER
        .metric_http_request_duration
        .observe(elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

/// Registry traffic goes through the interceptor, the rest is served locally.
async fn route_request(
    context: &ServerContext,
    request: Request<Incoming>,
    trace_id: Option<&String>,
) -> Response<ResponseBody> {
    let is_registry = matches!(
        router::parse(request.method(), request.uri()),
        Route::Registry
    );

    if is_registry {
        return context
            .interceptor
            .intercept(request, |request| context.forwarder.forward(request))
            .await;
    }

    let (parts, _) = request.into_parts();
    let route = router::parse(&parts.method, &parts.uri);

    let result = match route {
        Route::Healthz => handle_healthz(),
        Route::Metrics => handle_metrics(),
        route => api::handle(context, route, &parts).await,
    };

    match result {
        Ok(response) => response,
        Err(error) => error_to_response(&error, trace_id),
    }
}

fn handle_healthz() -> Result<Response<ResponseBody>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(ResponseBody::fixed(br#"{"status":"ok"}"#.to_vec()))?)
}

fn handle_metrics() -> Result<Response<ResponseBody>, Error> {
    let (content_type, metrics) = METRICS_PROVIDER.gather()?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(ResponseBody::fixed(metrics))?)
}

pub fn error_to_response(error: &Error, trace_id: Option<&String>) -> Response<ResponseBody> {
    error_response(error, json!({ "trace_id": trace_id }))
}
