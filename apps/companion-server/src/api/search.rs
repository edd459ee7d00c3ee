use axum::extract::{Query, State};
use axum::response::Response;
use axum::Extension;
use companion_core::SearchRequest;
use companion_protocol::{ApplicationSummary, SearchPayload};
use tracing::debug;

use super::{Params, RouteVersion};
use crate::lifecycle::RequestLifecycle;
use crate::responses::{json_ok, ServiceError};
use crate::AppState;

/// Federated search over one named source or every installed one.
pub(crate) async fn search_content(
    State(state): State<AppState>,
    Extension(version): Extension<RouteVersion>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let request = SearchRequest {
        source_id: params.optional("applicationId").map(str::to_string),
        tags: params.list("tags"),
        search_term: params.optional("searchTerm").map(str::to_string),
        limit: params.number("limit")?,
        offset: params.number("offset")?,
    };
    request.validate()?;
    debug!(
        device,
        source = ?request.source_id,
        tags = ?request.tags,
        term = ?request.search_term,
        limit = ?request.limit,
        offset = ?request.offset,
        "search content"
    );
    let scope = version.scope(device);

    lifecycle
        .run(async {
            let outcome = state.search().search(&request, &scope).await?;
            let applications = outcome
                .sources
                .into_iter()
                .map(|source| ApplicationSummary {
                    icon: scope.application_icon(&source.icon_ref),
                    application_id: source.source_id,
                    display_name: source.display_name,
                    short_description: source.short_description,
                    language: source.language,
                })
                .collect();
            Ok(json_ok(SearchPayload {
                remaining: outcome.remaining,
                applications,
                results: outcome.results,
            }))
        })
        .await
}
