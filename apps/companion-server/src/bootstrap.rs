use std::sync::Arc;

use anyhow::Context as _;
use companion_core::{CachedSourceResolver, FsContentLibrary, SourceResolver};
use tracing::info;

use crate::config::{PathsConfig, ServerConfig};
use crate::keepalive::KeepAlive;
use crate::tasks::TaskManager;
use crate::{access_log, library_watcher, lifecycle, router, AppState};

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
    pub background_tasks: TaskManager,
}

pub(crate) fn build(config: &ServerConfig) -> anyhow::Result<BootstrapOutput> {
    let paths = absolute_paths(&config.paths)?;
    info!(
        content = %paths.content_dir.display(),
        resources = %paths.resource_dir.display(),
        licenses = %paths.license_dir.display(),
        "content library configured"
    );

    let library = Arc::new(FsContentLibrary::new(paths.content_dir.clone()));
    let sources: Arc<dyn SourceResolver> =
        Arc::new(CachedSourceResolver::new(library.clone(), config.source_cache_ttl));
    let state = AppState::builder(sources.clone(), library.clone(), library)
        .with_keep_alive(KeepAlive::new())
        .with_paths(paths.clone())
        .with_inactivity_timeout(config.inactivity_timeout)
        .build();

    let (router, endpoints) = router::build_router();
    info!(endpoints = endpoints.len(), "routes registered");

    let mut background_tasks = TaskManager::new();
    background_tasks.push(library_watcher::start(
        sources,
        paths.content_dir,
        config.watch_interval,
    ));

    Ok(BootstrapOutput {
        router,
        state,
        background_tasks,
    })
}

/// Served URIs embed absolute `file://` paths, so every root is made absolute.
fn absolute_paths(paths: &PathsConfig) -> anyhow::Result<PathsConfig> {
    let absolute = |p: &std::path::Path| {
        std::path::absolute(p).with_context(|| format!("resolving {}", p.display()))
    };
    Ok(PathsConfig {
        content_dir: absolute(&paths.content_dir)?,
        resource_dir: absolute(&paths.resource_dir)?,
        license_dir: absolute(&paths.license_dir)?,
    })
}

pub(crate) fn attach_stateful_layers(router: axum::Router<AppState>, state: AppState) -> axum::Router<()> {
    router
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            lifecycle::lifecycle_mw,
        ))
        .with_state::<()>(state)
}

pub(crate) fn attach_http_layers(router: axum::Router<()>, concurrency_limit: usize) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::trace::TraceLayer;

    router
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router.layer(axum::middleware::from_fn(access_log::access_log_mw))
}

/// The fully layered application.
pub(crate) fn assemble(router: axum::Router<AppState>, state: AppState, concurrency_limit: usize) -> axum::Router<()> {
    attach_global_layers(attach_http_layers(
        attach_stateful_layers(router, state),
        concurrency_limit,
    ))
}
