//! `/resource` and `/license`: local files referenced from rewritten pages.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::extract::{OriginalUri, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Extension;
use companion_core::adjust::{normalize, AdjustContext, AdjusterKind, LicenseAdjuster};
use companion_core::ContentBlob;
use tracing::debug;
use url::Url;

use super::{Params, RouteVersion};
use crate::config::PathsConfig;
use crate::lifecycle::RequestLifecycle;
use crate::responses::ServiceError;
use crate::streaming::{stream_content, Adjustment};
use crate::AppState;

fn content_type_for_suffix(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "css" => Some("text/css"),
        "js" => Some("application/javascript"),
        "png" => Some("image/png"),
        "jpeg" | "jpg" => Some("image/jpeg"),
        _ => None,
    }
}

/// Map a `resource://` or `file://` URI onto a file under one of the
/// served roots.
fn resolve_resource(uri: &str, paths: &PathsConfig) -> Option<PathBuf> {
    let parsed = Url::parse(uri).ok()?;
    let candidate = match parsed.scheme() {
        "resource" => {
            let relative = parsed.path().trim_start_matches('/');
            paths.resource_dir.join(relative)
        }
        "file" => parsed.to_file_path().ok()?,
        _ => return None,
    };
    let candidate = normalize(&candidate);
    let roots = [
        Some(normalize(&paths.resource_dir)),
        paths.license_dir.parent().map(normalize),
    ];
    roots
        .into_iter()
        .flatten()
        .any(|root| candidate.starts_with(&root))
        .then_some(candidate)
}

/// `<license_dir>/<name>.html`. License names carry dots of their own
/// (`CC-BY-SA-3.0`), so only an existing `.html` suffix is kept.
fn license_path(name: &str, license_dir: &Path) -> Option<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return None;
    }
    if name.ends_with(".html") {
        Some(license_dir.join(name))
    } else {
        Some(license_dir.join(format!("{name}.html")))
    }
}

async fn open(path: &Path) -> Result<ContentBlob, ServiceError> {
    ContentBlob::open(path)
        .await
        .map_err(|err| ServiceError::failed(format!("{}: {err}", path.display())))
}

pub(crate) async fn resource(
    State(state): State<AppState>,
    Extension(version): Extension<RouteVersion>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    OriginalUri(original): OriginalUri,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let uri = params.require("uri")?;
    debug!(device, uri, "get resource");

    let suffix_path = Path::new(uri);
    let Some(content_type) = content_type_for_suffix(suffix_path) else {
        let suffix = suffix_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        return Err(ServiceError::failed(format!(
            "Don't know content type for suffix, {suffix}"
        )));
    };
    let Some(path) = resolve_resource(uri, state.paths()) else {
        return Err(ServiceError::not_found(original.path()));
    };
    let adjuster = params
        .optional("adjuster")
        .and_then(AdjusterKind::parse)
        .map(|kind| match kind {
            AdjusterKind::License => LicenseAdjuster::for_document(&path),
        });
    let ctx = AdjustContext::new(version.scope(device));

    lifecycle
        .run(async {
            let blob = open(&path).await?;
            let adjustment = adjuster.as_ref().map(|adjuster| Adjustment {
                adjuster,
                ctx: &ctx,
            });
            stream_content(&headers, content_type, blob, adjustment, HeaderMap::new()).await
        })
        .await
}

pub(crate) async fn license(
    State(state): State<AppState>,
    Extension(version): Extension<RouteVersion>,
    Extension(lifecycle): Extension<RequestLifecycle>,
    OriginalUri(original): OriginalUri,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Result<Response, ServiceError> {
    let device = params.require("deviceUUID")?;
    let name = params.require("name")?;
    debug!(device, name, "get license");

    let Some(path) = license_path(name, &state.paths().license_dir) else {
        return Err(ServiceError::not_found(original.path()));
    };
    let adjuster = LicenseAdjuster::for_document(&path);
    let ctx = AdjustContext::new(version.scope(device));

    lifecycle
        .run(async {
            let blob = match ContentBlob::open(&path).await {
                Ok(blob) => blob,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(ServiceError::not_found(original.path()));
                }
                Err(err) => return Err(ServiceError::failed(format!("{}: {err}", path.display()))),
            };
            stream_content(
                &headers,
                "text/html",
                blob,
                Some(Adjustment {
                    adjuster: &adjuster,
                    ctx: &ctx,
                }),
                HeaderMap::new(),
            )
            .await
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> PathsConfig {
        PathsConfig {
            content_dir: PathBuf::from("/srv/companion/content"),
            resource_dir: PathBuf::from("/srv/companion/resources"),
            license_dir: PathBuf::from("/srv/companion/licenses"),
        }
    }

    #[test]
    fn suffixes_map_to_content_types() {
        assert_eq!(content_type_for_suffix(Path::new("a/b.css")), Some("text/css"));
        assert_eq!(content_type_for_suffix(Path::new("x.JPG")), None);
        assert_eq!(content_type_for_suffix(Path::new("x.jpg")), Some("image/jpeg"));
        assert_eq!(content_type_for_suffix(Path::new("noext")), None);
    }

    #[test]
    fn resource_uris_resolve_under_served_roots() {
        let paths = paths();
        assert_eq!(
            resolve_resource("resource:///wrapper/css/clipboard.css", &paths),
            Some(PathBuf::from("/srv/companion/resources/wrapper/css/clipboard.css"))
        );
        assert_eq!(
            resolve_resource("file:///srv/companion/css/license.css", &paths),
            Some(PathBuf::from("/srv/companion/css/license.css"))
        );
        assert_eq!(resolve_resource("file:///etc/passwd.css", &paths), None);
        assert_eq!(resolve_resource("https://example.com/a.css", &paths), None);
    }

    #[test]
    fn license_names_stay_inside_the_license_dir() {
        let dir = Path::new("/srv/companion/licenses");
        assert_eq!(
            license_path("CC-BY-SA-3.0", dir),
            Some(PathBuf::from("/srv/companion/licenses/CC-BY-SA-3.0.html"))
        );
        assert_eq!(
            license_path("gpl.html", dir),
            Some(PathBuf::from("/srv/companion/licenses/gpl.html"))
        );
        assert_eq!(license_path("../secret", dir), None);
        assert_eq!(license_path("a/b", dir), None);
    }
}
