//! Source listings: applications, their icons, sets and tagged content.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use companion_core::search::DEFAULT_LOCAL_LIMIT;
use companion_core::uris::content_id_from_ref;
use companion_core::UriScope;
use companion_protocol::{
    ApplicationSet, ApplicationSummary, ContentDescriptor, Query as IndexQuery, SourceListing, TaggedContent,
    ARTICLE_OBJECT_TAG, HOME_PAGE_TAG, SET_CONTENT_TYPE, SET_OBJECT_TAG,
};
use serde_json::json;
use tracing::debug;

use super::{Params, RouteVersion};
use crate::lifecycle::RequestLifecycle;
use crate::responses::{json_ok, ServiceError};
use crate::AppState;

pub(crate) async fn list_applications(
    State(state): State<AppState>,
    Extension(version): Extension<RouteVersion>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    debug!(device, "list applications");
    let scope = version.scope(device);

    lifecycle
        .run(async {
            let sources = state.sources().list().await.map_err(ServiceError::from_lookup)?;
            let payload: Vec<ApplicationSummary> = sources
                .into_iter()
                .map(|source| ApplicationSummary {
                    icon: scope.application_icon(&source.icon_ref),
                    application_id: source.source_id,
                    display_name: source.display_name,
                    short_description: source.short_description,
                    language: source.language,
                })
                .collect();
            Ok(json_ok(payload))
        })
        .await
}

/// PNG bytes of an application icon.
pub(crate) async fn application_icon(
    State(state): State<AppState>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let icon = params.require("iconName")?;
    debug!(device, icon, "get application icon");

    lifecycle
        .run(async {
            let png = state.sources().icon(icon).await.map_err(|err| {
                ServiceError::new(
                    companion_protocol::ErrorCode::Failed,
                    json!({ "server_error": err.to_string() }),
                )
            })?;
            Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
        })
        .await
}

/// Sets of a source, or one synthetic global set when it has none.
pub(crate) async fn list_application_sets(
    State(state): State<AppState>,
    Extension(version): Extension<RouteVersion>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let source_id = params.require("applicationId")?;
    debug!(device, source = source_id, "list application sets");
    let scope = version.scope(device);

    lifecycle
        .run(async {
            let source = state
                .sources()
                .resolve(source_id)
                .await
                .map_err(ServiceError::from_lookup)?;
            let query = IndexQuery {
                tags_match_all: Some(vec![SET_OBJECT_TAG.to_string()]),
                limit: Some(DEFAULT_LOCAL_LIMIT),
                ..IndexQuery::default()
            };
            let sets = state
                .index()
                .query(&source, &query)
                .await
                .map_err(ServiceError::from_query)?;
            Ok(json_ok(json!({ "sets": application_sets(&source, sets, &scope) })))
        })
        .await
}

fn application_sets(source: &SourceListing, sets: Vec<ContentDescriptor>, scope: &UriScope) -> Vec<ApplicationSet> {
    if sets.is_empty() {
        return vec![ApplicationSet {
            tags: vec![HOME_PAGE_TAG.to_string()],
            title: source.display_name.clone(),
            content_type: SET_CONTENT_TYPE.to_string(),
            thumbnail: Some(scope.application_icon(&source.icon_ref)),
            id: String::new(),
            global: true,
        }];
    }
    sets.into_iter()
        .map(|set| ApplicationSet {
            thumbnail: set
                .thumbnail_ref
                .as_deref()
                .map(|thumb| scope.thumbnail(&source.source_id, thumb)),
            id: content_id_from_ref(&set.id).to_string(),
            tags: set.child_tags,
            title: set.display_title,
            content_type: SET_CONTENT_TYPE.to_string(),
            global: false,
        })
        .collect()
}

/// Articles carrying any of the `;` separated `tags`.
pub(crate) async fn list_application_content_for_tags(
    State(state): State<AppState>,
    Extension(version): Extension<RouteVersion>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let source_id = params.require("applicationId")?;
    params.require("tags")?;
    let tags = params.list("tags").unwrap_or_default();
    debug!(device, source = source_id, ?tags, "list application content for tags");
    let scope = version.scope(device);

    lifecycle
        .run(async {
            let source = state
                .sources()
                .resolve(source_id)
                .await
                .map_err(ServiceError::from_lookup)?;
            let query = IndexQuery {
                tags_match_any: Some(tags),
                tags_match_all: Some(vec![ARTICLE_OBJECT_TAG.to_string()]),
                limit: Some(DEFAULT_LOCAL_LIMIT),
                ..IndexQuery::default()
            };
            let found = state
                .index()
                .query(&source, &query)
                .await
                .map_err(ServiceError::from_query)?;
            let payload: Vec<TaggedContent> = found
                .into_iter()
                .map(|item| TaggedContent {
                    thumbnail: item
                        .thumbnail_ref
                        .as_deref()
                        .map(|thumb| scope.thumbnail(source_id, thumb)),
                    id: content_id_from_ref(&item.id).to_string(),
                    display_name: item.display_title,
                    content_type: item.content_type,
                    tags: item.tags.into_iter().collect(),
                })
                .collect();
            Ok(json_ok(payload))
        })
        .await
}
