use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use companion_core::adjust::AdjustError;
use companion_core::{LookupError, QueryError, RangeError, SearchError};
use companion_protocol::{ErrorCode, ErrorEnvelope, OkEnvelope};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

/// Error returned by route handlers, rendered as the JSON error envelope.
///
/// Business errors travel with HTTP 200; only unknown routes change the
/// status line.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {detail}")]
pub(crate) struct ServiceError {
    code: ErrorCode,
    detail: Value,
    status: StatusCode,
    content_range: Option<String>,
}

impl ServiceError {
    pub(crate) fn new(code: ErrorCode, detail: Value) -> Self {
        Self {
            code,
            detail,
            status: StatusCode::OK,
            content_range: None,
        }
    }

    pub(crate) fn code(&self) -> ErrorCode {
        self.code
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, json!({ "message": message.into() }))
    }

    pub(crate) fn missing_param(name: &str) -> Self {
        Self::new(
            ErrorCode::InvalidRequest,
            json!({ "missing_querystring_param": name }),
        )
    }

    pub(crate) fn invalid_app_id(application_id: &str) -> Self {
        Self::new(
            ErrorCode::InvalidAppId,
            json!({ "applicationId": application_id }),
        )
    }

    pub(crate) fn invalid_content_id(application_id: &str, content_id: &str) -> Self {
        Self::new(
            ErrorCode::InvalidContentId,
            json!({ "applicationId": application_id, "contentId": content_id }),
        )
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, Value::Null)
    }

    pub(crate) fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Failed, json!({ "message": message.into() }))
    }

    pub(crate) fn not_found(path: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            ..Self::new(ErrorCode::InvalidRequest, json!({ "invalid_path": path }))
        }
    }

    /// `INVALID_REQUEST` carrying `Content-Range: bytes */total`.
    pub(crate) fn range_not_satisfiable(err: RangeError, total: u64) -> Self {
        Self {
            content_range: Some(format!("bytes */{total}")),
            ..Self::invalid_request(err.to_string())
        }
    }

    /// Translate a source or content lookup failure.
    pub(crate) fn from_lookup(err: LookupError) -> Self {
        match err {
            LookupError::NoSuchSource(application_id) => Self::invalid_app_id(&application_id),
            LookupError::NoSuchContent {
                source_id,
                content_id,
            } => Self::invalid_content_id(&source_id, &content_id),
            LookupError::Failed(message) => Self::failed(message),
        }
    }

    pub(crate) fn from_query(err: QueryError) -> Self {
        match err {
            QueryError::ContentDefect { message, .. } => Self::failed(message),
            QueryError::InvalidArguments(message) => Self::invalid_request(message),
            QueryError::Cancelled => Self::cancelled(),
        }
    }
}

impl From<SearchError> for ServiceError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidRequest(message) => Self::invalid_request(message),
            SearchError::InvalidSource { source_id } => Self::invalid_app_id(&source_id),
            SearchError::Cancelled => Self::cancelled(),
            SearchError::Failed(message) => Self::failed(message),
        }
    }
}

impl From<AdjustError> for ServiceError {
    fn from(err: AdjustError) -> Self {
        Self::failed(format!("content adjustment failed: {err}"))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        debug!(code = %self.code, status = self.status.as_u16(), detail = %self.detail, "request failed");
        let mut response = (self.status, Json(ErrorEnvelope::new(self.code, self.detail))).into_response();
        if let Some(range) = self
            .content_range
            .and_then(|r| HeaderValue::from_str(&r).ok())
        {
            response.headers_mut().insert(header::CONTENT_RANGE, range);
        }
        response
    }
}

/// `{ "status": "ok", "payload": ... }`
pub(crate) fn json_ok<T: Serialize>(payload: T) -> Response {
    Json(OkEnvelope::new(payload)).into_response()
}
