use crate::error::{Error, PolicyViolation};
use crate::metrics_provider::METRICS_PROVIDER;
use crate::notary::{SignatureIndex, TrustStore};
use crate::oci::{Digest, Reference};
use crate::policy::PolicyChecker;
use crate::proxy::matcher::ImageInfo;
use crate::proxy::response_body::{copy_response, error_response, ResponseBody};
use crate::registry::RegistryClient;
use crate::scan::{resolve_overview, ScanStore, Severity};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Enforces content trust and vulnerability policy on manifest pulls before they reach the
/// registry.
pub struct Interceptor {
    policy: PolicyChecker,
    registry: Arc<dyn RegistryClient>,
    trust: Option<Arc<dyn TrustStore>>,
    scans: Option<Arc<dyn ScanStore>>,
    actor: String,
    allow_unscanned: bool,
    project_segments: usize,
}

impl Interceptor {
    pub fn new(policy: PolicyChecker, registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            policy,
            registry,
            trust: None,
            scans: None,
            actor: String::new(),
            allow_unscanned: false,
            project_segments: 1,
        }
    }

    /// Trust data is read on behalf of `actor`.
    pub fn with_trust(mut self, trust: Arc<dyn TrustStore>, actor: &str) -> Self {
        self.trust = Some(trust);
        self.actor = actor.to_string();
        self
    }

    pub fn with_scans(mut self, scans: Arc<dyn ScanStore>, allow_unscanned: bool) -> Self {
        self.scans = Some(scans);
        self.allow_unscanned = allow_unscanned;
        self
    }

    pub fn with_project_segments(mut self, project_segments: usize) -> Self {
        self.project_segments = project_segments.max(1);
        self
    }

    /// Forwards `request` with `forward` unless it pulls an image refused by policy.
    ///
    /// The upstream response is copied unchanged. A refused pull never reaches `forward`.
    pub async fn intercept<B, R, F, Fut>(
        &self,
        request: Request<B>,
        forward: F,
    ) -> Response<ResponseBody>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Result<Response<R>, Error>>,
        R: Body<Data = Bytes> + Send + 'static,
        R::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let image = ImageInfo::from_request(request.method(), request.uri(), self.project_segments);

        if let Some(image) = &image {
            if let Err(error) = self.check(image).await {
                return Self::deny(image, &error);
            }
        }

        match forward(request).await {
            Ok(response) => copy_response(response),
            Err(error) => {
                error!("Unable to forward request to the registry: {error}");
                error_response(&error, json!({}))
            }
        }
    }

    /// Decides whether pulling `image` complies with its project policy.
    #[instrument(skip(self))]
    pub async fn check(&self, image: &ImageInfo) -> Result<(), Error> {
        let decision = self.policy.decision(&image.project).await?;
        if !decision.enforces_anything() {
            return Ok(());
        }

        let digest = match &image.reference {
            Reference::Digest(digest) => digest.clone(),
            Reference::Tag(_) => {
                let digest = self
                    .registry
                    .manifest_exists(&image.repository, &image.reference)
                    .await?;
                let Some(digest) = digest else {
                    debug!("{}:{} is unknown to the registry", image.repository, image.reference);
                    return Ok(());
                };
                digest
            }
        };

        if decision.content_trust {
            self.verify_signature(image, &digest).await?;
        }

        if let Some(threshold) = decision.severity_threshold {
            self.verify_vulnerability(&digest, threshold).await?;
        }

        Ok(())
    }

    async fn verify_signature(&self, image: &ImageInfo, digest: &Digest) -> Result<(), Error> {
        let Some(trust) = &self.trust else {
            return Err(Error::ServiceUnavailable(
                "content trust is enforced but no trust service is configured".to_string(),
            ));
        };

        let index = SignatureIndex::fetch(trust.as_ref(), &self.actor, &image.repository).await?;

        let signed = match &image.reference {
            Reference::Tag(tag) => index.find(tag, digest)?.is_some(),
            Reference::Digest(_) => index.contains_digest(digest),
        };

        if signed {
            Ok(())
        } else {
            Err(Error::PolicyDenied(PolicyViolation::NotSigned))
        }
    }

    async fn verify_vulnerability(&self, digest: &Digest, threshold: Severity) -> Result<(), Error> {
        let Some(scans) = &self.scans else {
            return Err(Error::ServiceUnavailable(
                "vulnerability policy is enforced but no scanner is configured".to_string(),
            ));
        };

        let overview = resolve_overview(scans.as_ref(), digest)
            .await?
            .filter(|overview| overview.is_finished());

        let Some(overview) = overview else {
            if self.allow_unscanned {
                debug!("{digest} has no finished scan, allowed by configuration");
                return Ok(());
            }
            return Err(Error::PolicyDenied(PolicyViolation::Unscanned));
        };

        let severity = overview.severity.unwrap_or(Severity::Unknown);
        if severity >= threshold {
            return Err(Error::PolicyDenied(PolicyViolation::VulnerabilityTooHigh {
                severity,
                threshold,
            }));
        }

        Ok(())
    }

    fn deny(image: &ImageInfo, error: &Error) -> Response<ResponseBody> {
        match error {
            Error::PolicyDenied(violation) => {
                info!(
                    "Pull of {}:{} refused: {violation}",
                    image.repository, image.reference
                );
                METRICS_PROVIDER
                    .metric_policy_denials
                    .with_label_values(&[violation.reason()])
                    .inc();
                error_response(error, json!({}))
            }
            _ => {
                warn!(
                    "Unable to verify policy of {}:{}: {error}",
                    image.repository, image.reference
                );
                let error = Error::Internal(format!("policy verification failed: {error}"));
                error_response(&error, json!({}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notary::tests::{busybox_target, BUSYBOX_DIGEST};
    use crate::notary::MockTrustStore;
    use crate::policy::project::{ProjectConfig, StaticProjectDirectory};
    use crate::policy::PolicyOverride;
    use crate::registry::MockRegistryClient;
    use crate::scan::{memory, JobStatus};
    use http_body_util::{BodyExt, Full};
    use hyper::{Method, StatusCode};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn digest() -> Digest {
        BUSYBOX_DIGEST.parse().unwrap()
    }

    fn checker(policy_override: Option<PolicyOverride>, project: ProjectConfig) -> PolicyChecker {
        let projects = HashMap::from([("notary-demo".to_string(), project)]);
        PolicyChecker::new(
            Arc::new(StaticProjectDirectory::new(&projects)),
            policy_override,
        )
    }

    fn registry_with_digest() -> MockRegistryClient {
        let mut registry = MockRegistryClient::new();
        registry
            .expect_manifest_exists()
            .returning(|_, _| Ok(Some(digest())));
        registry
    }

    fn trust_with_targets() -> MockTrustStore {
        let mut trust = MockTrustStore::new();
        trust
            .expect_list_targets()
            .returning(|_, _| Ok(vec![busybox_target("1.0")]));
        trust
    }

    fn pull(path: &str) -> Request<()> {
        Request::builder()
            .method(Method::GET)
            .uri(format!("http://registry.local{path}"))
            .body(())
            .unwrap()
    }

    async fn run(interceptor: &Interceptor, request: Request<()>) -> (StatusCode, bool, String) {
        let forwarded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&forwarded);

        let response = interceptor
            .intercept(request, |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Error>(
                    Response::builder()
                        .status(StatusCode::OK)
                        .header("X-Test", "mytest")
                        .body(Full::new(Bytes::from_static(b"manifest")))
                        .unwrap(),
                )
            })
            .await;

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (
            status,
            forwarded.load(Ordering::SeqCst),
            String::from_utf8_lossy(&body).to_string(),
        )
    }

    fn vulnerable_project() -> ProjectConfig {
        ProjectConfig {
            content_trust: false,
            prevent_vulnerable: true,
            severity: Severity::Medium,
        }
    }

    #[tokio::test]
    async fn test_signed_pull_with_content_trust_override() {
        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry_with_digest()),
        )
        .with_trust(Arc::new(trust_with_targets()), "admin");

        let (status, forwarded, body) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);
        assert_eq!(body, "manifest");
    }

    #[tokio::test]
    async fn test_unsigned_tag_is_denied() {
        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry_with_digest()),
        )
        .with_trust(Arc::new(trust_with_targets()), "admin");

        let (status, forwarded, body) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/2.0")).await;

        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(!forwarded);
        assert!(body.contains("DENIED"));
    }

    #[tokio::test]
    async fn test_encoded_pull_is_checked() {
        let mut trust = MockTrustStore::new();
        trust.expect_list_targets().returning(|_, _| Ok(Vec::new()));

        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry_with_digest()),
        )
        .with_trust(Arc::new(trust), "admin");

        for path in [
            "/v2/notary-demo/busybox/manifests/1%2E0",
            "/v2/notary%2Ddemo/busybox/manifests/1.0",
        ] {
            let (status, forwarded, _) = run(&interceptor, pull(path)).await;
            assert_eq!(status, StatusCode::PRECONDITION_FAILED, "{path}");
            assert!(!forwarded, "{path}");
        }
    }

    #[tokio::test]
    async fn test_repointed_signed_tag_is_denied() {
        let mut registry = MockRegistryClient::new();
        registry.expect_manifest_exists().returning(|_, _| {
            Ok(Some(Digest::sha256_of(b"a different busybox manifest")))
        });

        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry),
        )
        .with_trust(Arc::new(trust_with_targets()), "admin");

        let (status, forwarded, body) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;

        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(!forwarded);
        assert!(body.contains("DENIED"));
    }

    #[tokio::test]
    async fn test_trust_is_read_as_configured_actor() {
        let mut trust = MockTrustStore::new();
        trust
            .expect_list_targets()
            .withf(|actor, repository| {
                actor == "harbor-ui" && repository == "notary-demo/busybox"
            })
            .times(1)
            .returning(|_, _| Ok(vec![busybox_target("1.0")]));

        let policy = || {
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            )
        };
        assert!(Interceptor::new(policy(), Arc::new(registry_with_digest()))
            .actor
            .is_empty());

        let interceptor = Interceptor::new(policy(), Arc::new(registry_with_digest()))
            .with_trust(Arc::new(trust), "harbor-ui");

        let (status, forwarded, _) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);
    }

    #[tokio::test]
    async fn test_signed_digest_reference() {
        let mut registry = MockRegistryClient::new();
        registry.expect_manifest_exists().never();

        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry),
        )
        .with_trust(Arc::new(trust_with_targets()), "admin");

        let (status, forwarded, _) = run(
            &interceptor,
            pull(&format!("/v2/notary-demo/busybox/manifests/{BUSYBOX_DIGEST}")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);
    }

    #[tokio::test]
    async fn test_requests_other_than_pulls_are_forwarded() {
        let mut registry = MockRegistryClient::new();
        registry.expect_manifest_exists().never();

        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry),
        );

        let request = Request::builder()
            .method(Method::PUT)
            .uri("/v2/notary-demo/busybox/manifests/1.0")
            .body(())
            .unwrap();
        let (status, forwarded, _) = run(&interceptor, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);

        let (status, forwarded, _) =
            run(&interceptor, pull("/v2/notary-demo/busybox/tags/list")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);
    }

    #[tokio::test]
    async fn test_project_without_policy_is_forwarded() {
        let mut registry = MockRegistryClient::new();
        registry.expect_manifest_exists().never();

        let interceptor = Interceptor::new(
            checker(None, ProjectConfig::default()),
            Arc::new(registry),
        );

        let (status, forwarded, _) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_forwarded() {
        let mut registry = MockRegistryClient::new();
        registry.expect_manifest_exists().returning(|_, _| Ok(None));

        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry),
        )
        .with_trust(Arc::new(MockTrustStore::new()), "admin");

        let (status, forwarded, _) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/9.9")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);
    }

    #[tokio::test]
    async fn test_trust_failure_is_internal_error() {
        let mut trust = MockTrustStore::new();
        trust
            .expect_list_targets()
            .returning(|_, _| Err(Error::Internal("notary unreachable".to_string())));

        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry_with_digest()),
        )
        .with_trust(Arc::new(trust), "admin");

        let (status, forwarded, body) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!forwarded);
        assert!(!body.contains("notary unreachable"));
    }

    #[tokio::test]
    async fn test_trust_not_configured_fails_closed() {
        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry_with_digest()),
        );

        let (status, forwarded, _) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!forwarded);
    }

    #[tokio::test]
    async fn test_vulnerability_threshold() {
        let cases = [
            (Severity::High, StatusCode::PRECONDITION_FAILED),
            (Severity::Medium, StatusCode::PRECONDITION_FAILED),
            (Severity::Low, StatusCode::OK),
            (Severity::None, StatusCode::OK),
        ];

        for (severity, expected) in cases {
            let scans = memory::Backend::new().with_scan(
                "notary-demo/busybox",
                "1.0",
                &digest(),
                JobStatus::Finished,
                severity,
            );
            let interceptor = Interceptor::new(
                checker(None, vulnerable_project()),
                Arc::new(registry_with_digest()),
            )
            .with_scans(Arc::new(scans), false);

            let (status, forwarded, _) =
                run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;
            assert_eq!(status, expected, "severity {severity}");
            assert_eq!(forwarded, expected == StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_unscanned_image() {
        let running = memory::Backend::new().with_scan(
            "notary-demo/busybox",
            "1.0",
            &digest(),
            JobStatus::Running,
            Severity::None,
        );
        let interceptor = Interceptor::new(
            checker(None, vulnerable_project()),
            Arc::new(registry_with_digest()),
        )
        .with_scans(Arc::new(running), false);

        let (status, forwarded, _) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(!forwarded);

        let interceptor = Interceptor::new(
            checker(None, vulnerable_project()),
            Arc::new(registry_with_digest()),
        )
        .with_scans(Arc::new(memory::Backend::new()), true);

        let (status, forwarded, _) =
            run(&interceptor, pull("/v2/notary-demo/busybox/manifests/1.0")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(forwarded);
    }

    #[tokio::test]
    async fn test_check_reports_violation() {
        let interceptor = Interceptor::new(
            checker(
                PolicyOverride::from_env_value(Some("1")),
                ProjectConfig::default(),
            ),
            Arc::new(registry_with_digest()),
        )
        .with_trust(Arc::new(trust_with_targets()), "admin");

        let image = ImageInfo {
            repository: "notary-demo/busybox".to_string(),
            reference: Reference::Tag("2.0".to_string()),
            project: "notary-demo".to_string(),
        };

        assert_eq!(
            interceptor.check(&image).await,
            Err(Error::PolicyDenied(PolicyViolation::NotSigned))
        );
    }
}
