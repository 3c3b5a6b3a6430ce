use crate::configuration::{self, Configuration};
use crate::http_client::HttpClient;
use crate::notary::client::NotaryClient;
use crate::notary::TrustStore;
use crate::policy::project::{ProjectDirectory, StaticProjectDirectory};
use crate::policy::{PolicyChecker, PolicyOverride};
use crate::proxy::{Forwarder, Interceptor};
use crate::registry::client::HttpRegistryClient;
use crate::registry::RegistryClient;
use crate::repository::events::{AuditLog, EventSink, ReplicationWebhook};
use crate::repository::RepositoryService;
use crate::scan::job_service::JobServiceClient;
use crate::scan::redis::Backend as RedisScanStore;
use crate::scan::ScanStore;
use crate::task_queue::TaskQueue;
use std::sync::Arc;
use tracing::info;

/// Everything a request needs, rebuilt from scratch on every configuration change.
pub struct ServerContext {
    pub interceptor: Interceptor,
    pub forwarder: Forwarder,
    pub repositories: RepositoryService,
}

impl ServerContext {
    pub fn new(
        config: &Configuration,
        policy_override: Option<PolicyOverride>,
        task_queue: Arc<TaskQueue>,
    ) -> Result<Self, configuration::Error> {
        let registry_client = HttpClient::new(&config.registry.client)?;
        let registry: Arc<dyn RegistryClient> = Arc::new(HttpRegistryClient::new(
            registry_client,
            &config.registry.url,
        ));
        let projects: Arc<dyn ProjectDirectory> =
            Arc::new(StaticProjectDirectory::new(&config.project));
        let project_segments = config.policy.project_segments;

        let policy = PolicyChecker::new(projects.clone(), policy_override);
        let mut interceptor =
            Interceptor::new(policy, registry.clone()).with_project_segments(project_segments);
        let mut repositories = RepositoryService::new(registry, projects)
            .with_project_segments(project_segments);

        if let Some(trust_config) = &config.trust {
            info!("Using trust service at {}", trust_config.url);
            let trust: Arc<dyn TrustStore> = Arc::new(NotaryClient::new(
                HttpClient::new(&trust_config.client)?,
                &trust_config.url,
                &trust_config.registry_host,
            ));
            interceptor = interceptor.with_trust(trust.clone(), &trust_config.actor);
            repositories = repositories.with_trust(trust);
        }

        if let Some(scanner_config) = &config.scanner {
            if let Some(redis_config) = &scanner_config.redis {
                let scans: Arc<dyn ScanStore> = Arc::new(RedisScanStore::new(redis_config)?);
                interceptor = interceptor.with_scans(scans.clone(), scanner_config.allow_unscanned);
                repositories = repositories.with_scans(scans);
            }

            if let Some(url) = &scanner_config.job_service_url {
                info!("Using scan job service at {url}");
                let trigger = JobServiceClient::new(HttpClient::new(&scanner_config.client)?, url);
                repositories = repositories.with_scan_trigger(Arc::new(trigger));
            }
        }

        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(AuditLog)];
        if let Some(replication) = &config.replication {
            info!("Notifying replication at {}", replication.webhook_url);
            let webhook = ReplicationWebhook::new(
                HttpClient::new(&replication.client)?,
                &replication.webhook_url,
            );
            sinks.push(Arc::new(webhook));
        }
        repositories = repositories.with_events(task_queue, sinks);

        let forwarder = Forwarder::new(&config.registry.url, &config.registry.client)?;

        Ok(Self {
            interceptor,
            forwarder,
            repositories,
        })
    }
}
