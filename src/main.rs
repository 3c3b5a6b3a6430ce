#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use crate::command::server;
use crate::configuration::watcher::ConfigWatcher;
use crate::configuration::{Configuration, ObservabilityConfig, TracingConfig};
use crate::policy::PolicyOverride;
use crate::task_queue::TaskQueue;
use argh::FromArgs;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

mod command;
mod configuration;
mod error;
mod http_client;
mod metrics_provider;
mod notary;
mod oci;
mod policy;
mod proxy;
mod registry;
mod repository;
mod scan;
mod task_queue;

const CONTENT_TRUST_ENV: &str = "PROJECT_CONTENT_TRUST";

fn otlp_layer<S>(
    tracing_config: &TracingConfig,
) -> Result<OpenTelemetryLayer<S, SdkTracer>, configuration::Error>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    let resource = Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();
    let otlp_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&tracing_config.endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_sampler(Sampler::TraceIdRatioBased(tracing_config.sampling_rate))
        .build();

    let tracer = tracer_provider.tracer(env!("CARGO_PKG_NAME"));
    let _ = global::set_tracer_provider(tracer_provider);
    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// JSON logs filtered by `RUST_LOG`, plus OTLP span export when configured.
fn set_tracing(config: Option<&ObservabilityConfig>) -> Result<(), configuration::Error> {
    let telemetry: Option<OpenTelemetryLayer<Registry, SdkTracer>> = config
        .and_then(|config| config.tracing.as_ref())
        .map(otlp_layer)
        .transpose()?;

    let _ = tracing_subscriber::registry()
        .with(telemetry)
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .try_init();
    Ok(())
}

/// The environment switch wins over `[policy.override]`; both are read once at startup.
fn resolve_policy_override(config: &Configuration) -> Option<PolicyOverride> {
    let from_env = std::env::var(CONTENT_TRUST_ENV).ok();
    PolicyOverride::from_env_value(from_env.as_deref()).or(config.policy.policy_override)
}

#[derive(FromArgs, PartialEq, Debug)]
/// A registry front-end enforcing content trust and vulnerability policies on image pulls
struct GlobalArguments {
    #[argh(option, short = 'c', default = "String::from(\"config.toml\")")]
    /// the path to the configuration file, defaults to `config.toml`
    config: String,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Serve(server::Options),
}

fn main() -> Result<(), command::Error> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| {
            command::Error::Initialization("Failed to install rustls crypto provider".to_string())
        })?;

    let cli_args: GlobalArguments = argh::from_env();

    let config = Configuration::load(&cli_args.config)?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.global.max_concurrent_requests)
        .enable_all()
        .build()?
        .block_on(run_command(cli_args, config))
}

async fn run_command(
    cli_args: GlobalArguments,
    config: Configuration,
) -> Result<(), command::Error> {
    set_tracing(config.observability.as_ref())?;

    let policy_override = resolve_policy_override(&config);
    if let Some(policy_override) = &policy_override {
        info!("Policy override in effect for every project: {policy_override:?}");
    }

    let task_queue = Arc::new(TaskQueue::new(config.global.max_concurrent_background_jobs)?);

    match cli_args.subcommand {
        SubCommand::Serve(_) => {
            let server = Arc::new(server::Command::new(&config, policy_override, task_queue)?);

            let _watcher = ConfigWatcher::new(&cli_args.config, server.clone())?;
            server.run().await
        }
    }
}
