//! `/content_data` and `/content_metadata`.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use axum::Extension;
use companion_core::adjust::{AdjustContext, ShardContentAdjuster};
use companion_core::UriScope;
use companion_protocol::ContentMetadata;
use serde_json::Value;
use tracing::debug;

use super::{Params, RouteVersion};
use crate::lifecycle::RequestLifecycle;
use crate::responses::{json_ok, ServiceError};
use crate::streaming::{stream_content, Adjustment};
use crate::AppState;

/// Points wiki articles at their lead image.
pub(crate) const ARTICLE_THUMBNAIL: HeaderName = HeaderName::from_static("x-article-thumbnail");

const WIKI_SOURCES: [&str; 2] = ["wikipedia", "wikihow"];

pub(crate) async fn content_data(
    State(state): State<AppState>,
    Extension(version): Extension<RouteVersion>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let source_id = params.require("applicationId")?;
    let content_id = params.require("contentId")?;
    debug!(device, source = source_id, content = content_id, "get content stream");
    let scope = version.scope(device);

    lifecycle
        .run(async {
            let record = state
                .store()
                .lookup(source_id, content_id)
                .await
                .map_err(ServiceError::from_lookup)?;
            let metadata: ContentMetadata = serde_json::from_slice(&record.metadata)
                .map_err(|err| ServiceError::failed(format!("unreadable content metadata: {err}")))?;
            let source = state
                .sources()
                .resolve(source_id)
                .await
                .map_err(ServiceError::from_lookup)?;

            let mut extra = HeaderMap::new();
            if let Some(thumbnail) = article_thumbnail(&metadata, source_id, &scope) {
                extra.insert(ARTICLE_THUMBNAIL, thumbnail);
            }
            let content_type = metadata.content_type.clone();
            let adjuster = ShardContentAdjuster::new(metadata, source, state.store(), state.index());
            let ctx = AdjustContext::new(scope.clone());
            stream_content(
                &headers,
                &content_type,
                record.data,
                Some(Adjustment {
                    adjuster: &adjuster,
                    ctx: &ctx,
                }),
                extra,
            )
            .await
        })
        .await
}

fn article_thumbnail(metadata: &ContentMetadata, source_id: &str, scope: &UriScope) -> Option<HeaderValue> {
    let is_wiki = metadata
        .source
        .as_deref()
        .is_some_and(|source| WIKI_SOURCES.contains(&source));
    if !is_wiki {
        return None;
    }
    let thumbnail = metadata.thumbnail.as_deref()?;
    HeaderValue::from_str(&scope.thumbnail(source_id, thumbnail)).ok()
}

/// Stored metadata plus the source's runtime `version`.
pub(crate) async fn content_metadata(
    State(state): State<AppState>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let source_id = params.require("applicationId")?;
    let content_id = params.require("contentId")?;
    debug!(device, source = source_id, content = content_id, "get content metadata");

    lifecycle
        .run(async {
            let record = state
                .store()
                .lookup(source_id, content_id)
                .await
                .map_err(ServiceError::from_lookup)?;
            let mut metadata: Value = serde_json::from_slice(&record.metadata)
                .map_err(|err| ServiceError::failed(format!("unreadable content metadata: {err}")))?;
            let version = state
                .sources()
                .runtime_version(source_id)
                .await
                .map_err(ServiceError::from_lookup)?;
            let Some(object) = metadata.as_object_mut() else {
                return Err(ServiceError::failed("content metadata is not an object"));
            };
            object.insert("version".into(), version.map(Value::from).unwrap_or(Value::Null));
            Ok(json_ok(metadata))
        })
        .await
}
