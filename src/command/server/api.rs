use crate::command::server::request_ext::HeaderExt;
use crate::command::server::router::Route;
use crate::command::server::ServerContext;
use crate::error::Error;
use crate::proxy::{json_response, ResponseBody};
use hyper::http::request::Parts;
use hyper::{Method, Response, StatusCode};
use tracing::instrument;

/// Runs one of the repository management operations.
#[instrument(skip(context, parts), fields(action = route.action_name()))]
pub async fn handle(
    context: &ServerContext,
    route: Route<'_>,
    parts: &Parts,
) -> Result<Response<ResponseBody>, Error> {
    let repositories = &context.repositories;

    match route {
        Route::ListRepositories { project } => {
            let summaries = repositories.list_repositories(project.as_deref()).await?;
            json_response(StatusCode::OK, &summaries)
        }
        Route::ListTags { repository } => {
            let tags = repositories.list_tags(repository, &parts.actor()).await?;
            json_response(StatusCode::OK, &tags)
        }
        Route::GetTag { repository, tag } => {
            let tag = repositories.get_tag(repository, tag, &parts.actor()).await?;
            json_response(StatusCode::OK, &tag)
        }
        Route::GetManifest {
            repository,
            tag,
            version,
        } => {
            let manifest = repositories.get_manifest(repository, tag, &version).await?;
            json_response(StatusCode::OK, &manifest)
        }
        Route::DeleteTag { repository, tag } => {
            let outcome = repositories
                .delete(repository, Some(tag), &parts.actor())
                .await?;
            json_response(StatusCode::OK, &outcome)
        }
        Route::DeleteRepository { repository } => {
            let outcome = repositories.delete(repository, None, &parts.actor()).await?;
            json_response(StatusCode::OK, &outcome)
        }
        Route::ListSignatures { repository } => {
            let targets = repositories.signatures(repository, &parts.actor()).await?;
            json_response(StatusCode::OK, &targets)
        }
        Route::ScanTag { repository, tag } => {
            repositories.scan(repository, tag).await?;
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(ResponseBody::empty())?)
        }
        Route::Unknown | Route::Healthz | Route::Metrics | Route::Registry => {
            handle_unknown_route(parts)
        }
    }
}

fn handle_unknown_route(parts: &Parts) -> Result<Response<ResponseBody>, Error> {
    if [Method::GET, Method::HEAD].contains(&parts.method) {
        let msg = format!("unknown route: {} {}", parts.method, parts.uri);
        Err(Error::NotFound(msg))
    } else {
        let msg = format!("unsupported route: {} {}", parts.method, parts.uri);
        Err(Error::BadRequest(msg))
    }
}
