use hyper::{Method, Uri};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::LazyLock;

static ROUTE_TAG_MANIFEST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/repositories/(?P<repository>.+)/tags/(?P<tag>[^/]+)/manifest$").unwrap()
});
static ROUTE_TAG_SCAN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/repositories/(?P<repository>.+)/tags/(?P<tag>[^/]+)/scan$").unwrap()
});
static ROUTE_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/repositories/(?P<repository>.+)/tags/(?P<tag>[^/]+)$").unwrap()
});
static ROUTE_TAGS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/api/repositories/(?P<repository>.+)/tags/?$").unwrap());
static ROUTE_SIGNATURES_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/repositories/(?P<repository>.+)/signatures/?$").unwrap()
});
static ROUTE_REPOSITORY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/api/repositories/(?P<repository>.+?)/?$").unwrap());

#[derive(Clone, Debug, PartialEq)]
pub enum Route<'a> {
    Healthz,
    Metrics,
    ListRepositories { project: Option<String> },
    ListTags { repository: &'a str },
    GetTag { repository: &'a str, tag: &'a str },
    GetManifest {
        repository: &'a str,
        tag: &'a str,
        version: String,
    },
    DeleteTag { repository: &'a str, tag: &'a str },
    DeleteRepository { repository: &'a str },
    ListSignatures { repository: &'a str },
    ScanTag { repository: &'a str, tag: &'a str },
    /// An `/api` path without a matching operation.
    Unknown,
    /// Everything else goes to the registry, through the pull interceptor.
    Registry,
}

impl Route<'_> {
    pub fn action_name(&self) -> &'static str {
        match self {
            Route::Healthz => "healthz",
            Route::Metrics => "metrics",
            Route::ListRepositories { .. } => "list-repositories",
            Route::ListTags { .. } => "list-tags",
            Route::GetTag { .. } => "get-tag",
            Route::GetManifest { .. } => "get-manifest",
            Route::DeleteTag { .. } => "delete-tag",
            Route::DeleteRepository { .. } => "delete-repository",
            Route::ListSignatures { .. } => "list-signatures",
            Route::ScanTag { .. } => "scan-tag",
            Route::Unknown => "unknown",
            Route::Registry => "registry",
        }
    }
}

#[derive(Deserialize, Default)]
struct ProjectQuery {
    project: Option<String>,
}

#[derive(Deserialize, Default)]
struct VersionQuery {
    version: Option<String>,
}

fn parse_query<T: DeserializeOwned + Default>(params: Option<&str>) -> T {
    params
        .and_then(|params| serde_urlencoded::from_str(params).ok())
        .unwrap_or_default()
}

fn captures<'a>(regex: &Regex, path: &'a str) -> Option<(&'a str, Option<&'a str>)> {
    let captures = regex.captures(path)?;
    let repository = captures.name("repository")?.as_str();
    let tag = captures.name("tag").map(|tag| tag.as_str());
    Some((repository, tag))
}

pub fn parse<'a>(method: &Method, uri: &'a Uri) -> Route<'a> {
    let path = uri.path();
    let params = uri.query();

    match path {
        "/healthz" if method == Method::GET => return Route::Healthz,
        "/metrics" if method == Method::GET => return Route::Metrics,
        "/api/repositories" | "/api/repositories/" if method == Method::GET => {
            let query: ProjectQuery = parse_query(params);
            return Route::ListRepositories {
                project: query.project.filter(|project| !project.is_empty()),
            };
        }
        _ => {}
    }

    if !path.starts_with("/api/") {
        return Route::Registry;
    }

    if let Some((repository, Some(tag))) = captures(&ROUTE_TAG_MANIFEST_REGEX, path) {
        if method == Method::GET {
            let query: VersionQuery = parse_query(params);
            return Route::GetManifest {
                repository,
                tag,
                version: query
                    .version
                    .filter(|version| !version.is_empty())
                    .unwrap_or_else(|| "v2".to_string()),
            };
        }
        return Route::Unknown;
    }

    if let Some((repository, Some(tag))) = captures(&ROUTE_TAG_SCAN_REGEX, path) {
        if method == Method::POST {
            return Route::ScanTag { repository, tag };
        }
        return Route::Unknown;
    }

    if let Some((repository, Some(tag))) = captures(&ROUTE_TAG_REGEX, path) {
        return match *method {
            Method::GET => Route::GetTag { repository, tag },
            Method::DELETE => Route::DeleteTag { repository, tag },
            _ => Route::Unknown,
        };
    }

    if let Some((repository, _)) = captures(&ROUTE_TAGS_REGEX, path) {
        if method == Method::GET {
            return Route::ListTags { repository };
        }
        return Route::Unknown;
    }

    if let Some((repository, _)) = captures(&ROUTE_SIGNATURES_REGEX, path) {
        if method == Method::GET {
            return Route::ListSignatures { repository };
        }
        return Route::Unknown;
    }

    if let Some((repository, _)) = captures(&ROUTE_REPOSITORY_REGEX, path) {
        if method == Method::DELETE {
            return Route::DeleteRepository { repository };
        }
    }

    Route::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_route(method: Method, uri: &str, expected: Route<'_>) {
        let uri: Uri = uri.parse().unwrap();
        assert_eq!(parse(&method, &uri), expected);
    }

    #[test]
    fn test_parse_service_routes() {
        assert_route(Method::GET, "/healthz", Route::Healthz);
        assert_route(Method::GET, "/metrics", Route::Metrics);
        assert_route(Method::POST, "/healthz", Route::Registry);
    }

    #[test]
    fn test_parse_list_repositories() {
        assert_route(
            Method::GET,
            "/api/repositories?project=library",
            Route::ListRepositories {
                project: Some("library".to_string()),
            },
        );
        assert_route(
            Method::GET,
            "/api/repositories",
            Route::ListRepositories { project: None },
        );
        assert_route(
            Method::GET,
            "/api/repositories?project=",
            Route::ListRepositories { project: None },
        );
    }

    #[test]
    fn test_parse_tag_routes() {
        assert_route(
            Method::GET,
            "/api/repositories/library/ubuntu/tags",
            Route::ListTags {
                repository: "library/ubuntu",
            },
        );
        assert_route(
            Method::GET,
            "/api/repositories/library/ubuntu/tags/14.04",
            Route::GetTag {
                repository: "library/ubuntu",
                tag: "14.04",
            },
        );
        assert_route(
            Method::DELETE,
            "/api/repositories/team/apps/web/tags/latest",
            Route::DeleteTag {
                repository: "team/apps/web",
                tag: "latest",
            },
        );
        assert_route(
            Method::POST,
            "/api/repositories/library/ubuntu/tags/14.04/scan",
            Route::ScanTag {
                repository: "library/ubuntu",
                tag: "14.04",
            },
        );
        assert_route(
            Method::PUT,
            "/api/repositories/library/ubuntu/tags/14.04",
            Route::Unknown,
        );
    }

    #[test]
    fn test_parse_manifest_route() {
        assert_route(
            Method::GET,
            "/api/repositories/library/ubuntu/tags/14.04/manifest?version=v1",
            Route::GetManifest {
                repository: "library/ubuntu",
                tag: "14.04",
                version: "v1".to_string(),
            },
        );
        assert_route(
            Method::GET,
            "/api/repositories/library/ubuntu/tags/14.04/manifest",
            Route::GetManifest {
                repository: "library/ubuntu",
                tag: "14.04",
                version: "v2".to_string(),
            },
        );
    }

    #[test]
    fn test_parse_repository_routes() {
        assert_route(
            Method::GET,
            "/api/repositories/notary-demo/busybox/signatures",
            Route::ListSignatures {
                repository: "notary-demo/busybox",
            },
        );
        assert_route(
            Method::DELETE,
            "/api/repositories/library/ubuntu",
            Route::DeleteRepository {
                repository: "library/ubuntu",
            },
        );
        assert_route(
            Method::GET,
            "/api/repositories/library/ubuntu",
            Route::Unknown,
        );
        assert_route(Method::GET, "/api/projects", Route::Unknown);
    }

    #[test]
    fn test_parse_registry_routes() {
        assert_route(
            Method::GET,
            "/v2/library/ubuntu/manifests/14.04",
            Route::Registry,
        );
        assert_route(Method::GET, "/v2/", Route::Registry);
        assert_route(
            Method::PUT,
            "/v2/library/ubuntu/blobs/uploads/abc",
            Route::Registry,
        );
    }
}
