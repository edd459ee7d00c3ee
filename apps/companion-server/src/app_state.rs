use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use companion_core::{ContentStore, QueryService, SearchReconciler, SourceResolver};

use crate::config::PathsConfig;
use crate::keepalive::KeepAlive;

#[derive(Clone)]
pub(crate) struct AppState {
    sources: Arc<dyn SourceResolver>,
    store: Arc<dyn ContentStore>,
    index: Arc<dyn QueryService>,
    search: Arc<SearchReconciler>,
    keep_alive: KeepAlive,
    paths: Arc<PathsConfig>,
    inactivity_timeout: Option<Duration>,
}

impl AppState {
    pub(crate) fn builder(
        sources: Arc<dyn SourceResolver>,
        store: Arc<dyn ContentStore>,
        index: Arc<dyn QueryService>,
    ) -> AppStateBuilder {
        AppStateBuilder {
            sources,
            store,
            index,
            keep_alive: None,
            paths: None,
            inactivity_timeout: None,
        }
    }

    pub(crate) fn sources(&self) -> Arc<dyn SourceResolver> {
        self.sources.clone()
    }

    pub(crate) fn store(&self) -> Arc<dyn ContentStore> {
        self.store.clone()
    }

    pub(crate) fn index(&self) -> Arc<dyn QueryService> {
        self.index.clone()
    }

    pub(crate) fn search(&self) -> &SearchReconciler {
        &self.search
    }

    pub(crate) fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    pub(crate) fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    pub(crate) fn inactivity_timeout(&self) -> Option<Duration> {
        self.inactivity_timeout
    }

    /// Milliseconds the server promises to stay up after answering.
    pub(crate) fn alive_for_further(&self) -> Option<u128> {
        self.inactivity_timeout.map(|t| t.as_millis())
    }
}

pub(crate) struct AppStateBuilder {
    sources: Arc<dyn SourceResolver>,
    store: Arc<dyn ContentStore>,
    index: Arc<dyn QueryService>,
    keep_alive: Option<KeepAlive>,
    paths: Option<PathsConfig>,
    inactivity_timeout: Option<Duration>,
}

impl AppStateBuilder {
    pub(crate) fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub(crate) fn with_paths(mut self, paths: PathsConfig) -> Self {
        self.paths = Some(paths);
        self
    }

    pub(crate) fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub(crate) fn build(self) -> AppState {
        let paths = self.paths.unwrap_or_else(|| PathsConfig {
            content_dir: PathBuf::from("./content"),
            resource_dir: PathBuf::from("./resources"),
            license_dir: PathBuf::from("./licenses"),
        });
        AppState {
            search: Arc::new(SearchReconciler::new(self.sources.clone(), self.index.clone())),
            sources: self.sources,
            store: self.store,
            index: self.index,
            keep_alive: self.keep_alive.unwrap_or_default(),
            paths: Arc::new(paths),
            inactivity_timeout: self.inactivity_timeout,
        }
    }
}
