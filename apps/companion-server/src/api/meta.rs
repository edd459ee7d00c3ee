use axum::extract::{OriginalUri, Query};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use companion_protocol::SERVER_API_VERSION;
use serde_json::json;
use tracing::info;

use super::Params;
use crate::responses::{json_ok, ServiceError};

const LANDING_PAGE: &str = r#"<html>
    <body>
        <h1>Companion Content Server</h1>
        <p>This is the web server for the companion app. Connect to this
           computer from your device.</p>
    </body>
</html>
"#;

pub(crate) async fn root() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// Keeps the server alive; takes no parameters.
pub(crate) async fn heartbeat() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

pub(crate) async fn version() -> Response {
    json_ok(json!({ "version": SERVER_API_VERSION }))
}

pub(crate) async fn device_authenticate(Query(params): Query<Params>) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    info!(device, "authorize client");
    Ok(Json(json!({ "status": "ok", "error": null })).into_response())
}

pub(crate) async fn not_found(OriginalUri(uri): OriginalUri) -> ServiceError {
    ServiceError::not_found(uri.path())
}
