//! Byte-range aware responder shared by every route that serves a payload.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use companion_core::adjust::{AdjustContext, ContentAdjuster};
use companion_core::{range_for_header, ContentBlob};
use tracing::debug;

use crate::responses::ServiceError;

/// An adjuster and the per-request inputs it renders with.
pub(crate) struct Adjustment<'a> {
    pub adjuster: &'a dyn ContentAdjuster,
    pub ctx: &'a AdjustContext,
}

/// Build the response for `blob`.
///
/// When the adjuster wants this content type the payload is buffered and
/// rendered first; otherwise it is streamed from the source untouched. The
/// `Range` header is resolved against the final size.
pub(crate) async fn stream_content(
    request_headers: &HeaderMap,
    content_type: &str,
    blob: ContentBlob,
    adjustment: Option<Adjustment<'_>>,
    extra_headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let blob = match adjustment {
        Some(Adjustment { adjuster, ctx }) if adjuster.needs_adjustment(content_type) => {
            let raw = blob
                .read_all()
                .await
                .map_err(|err| ServiceError::failed(format!("failed to read content: {err}")))?;
            let rendered = adjuster.render(content_type, raw, ctx).await?;
            ContentBlob::from_bytes(rendered)
        }
        _ => blob,
    };

    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let total = blob.size();

    let mut builder = Response::builder().header(header::CONTENT_TYPE, content_type);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(extra_headers);
    }

    if total == 0 {
        return builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, 0)
            .body(Body::empty())
            .map_err(|err| ServiceError::failed(err.to_string()));
    }

    let requested = request_headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or_default());
    let range = range_for_header(requested, total)
        .map_err(|err| ServiceError::range_not_satisfiable(err, total))?;

    if range.partial {
        builder = builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_RANGE, range.content_range());
    } else {
        builder = builder.status(StatusCode::OK);
    }
    debug!(
        start = range.start,
        end = range.end,
        total,
        partial = range.partial,
        "streaming content"
    );

    let stream = blob
        .into_window(range.start, range.length())
        .await
        .map_err(|err| ServiceError::failed(format!("failed to seek content: {err}")))?;
    builder
        .header(header::CONTENT_LENGTH, range.length())
        .body(Body::from_stream(stream))
        .map_err(|err| ServiceError::failed(err.to_string()))
}
