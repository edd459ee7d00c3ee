//! In-memory collaborators for tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use companion_protocol::{ContentDescriptor, Query, SourceListing, ARTICLE_OBJECT_TAG};
use serde_json::Value;

use crate::sources::{
    ContentBlob, ContentRecord, ContentStore, LinkTable, LookupError, QueryError, QueryService,
    SourceResolver,
};

pub fn listing(source_id: &str, display_name: &str) -> SourceListing {
    SourceListing {
        source_id: source_id.to_string(),
        display_name: display_name.to_string(),
        short_description: format!("{display_name} description"),
        icon_ref: source_id.to_string(),
        language: Some("en".into()),
    }
}

pub fn article(id: &str, title: &str) -> ContentDescriptor {
    ContentDescriptor {
        id: id.to_string(),
        content_type: "text/html".into(),
        tags: BTreeSet::from([ARTICLE_OBJECT_TAG.to_string()]),
        display_title: title.to_string(),
        thumbnail_ref: None,
        child_tags: Vec::new(),
        extra_metadata: Default::default(),
    }
}

#[derive(Clone)]
struct StoredContent {
    metadata: Value,
    data: Bytes,
}

#[derive(Default)]
struct State {
    sources: Vec<SourceListing>,
    versions: HashMap<String, u32>,
    icons: HashMap<String, Bytes>,
    content: HashMap<(String, String), StoredContent>,
    link_tables: HashMap<String, Vec<LinkTable>>,
    query_results: HashMap<String, Result<Vec<ContentDescriptor>, QueryError>>,
    queries: Vec<(String, Query)>,
}

/// Source resolver, content store and index backed by plain maps.
#[derive(Default)]
pub struct MemoryLibrary {
    state: Mutex<State>,
    resolve_calls: AtomicUsize,
    query_delay: Mutex<Option<Duration>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory library lock")
    }

    pub fn add_source(&self, listing: SourceListing) {
        let mut state = self.state();
        state.sources.retain(|s| s.source_id != listing.source_id);
        state.sources.push(listing);
    }

    pub fn set_runtime_version(&self, source_id: &str, version: u32) {
        self.state().versions.insert(source_id.to_string(), version);
    }

    pub fn add_icon(&self, icon_ref: &str, png: impl Into<Bytes>) {
        self.state().icons.insert(icon_ref.to_string(), png.into());
    }

    pub fn add_content(&self, source_id: &str, content_id: &str, metadata: Value, data: impl Into<Bytes>) {
        self.state().content.insert(
            (source_id.to_string(), content_id.to_string()),
            StoredContent {
                metadata,
                data: data.into(),
            },
        );
    }

    pub fn add_link_table<I>(&self, source_id: &str, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.state()
            .link_tables
            .entry(source_id.to_string())
            .or_default()
            .push(entries.into_iter().collect());
    }

    /// Queries on `source_id` answer with the `offset`/`limit` page of
    /// `results`.
    pub fn set_query_results(
        &self,
        source_id: &str,
        results: Result<Vec<ContentDescriptor>, QueryError>,
    ) {
        self.state()
            .query_results
            .insert(source_id.to_string(), results);
    }

    /// Make every query wait before answering.
    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().expect("delay lock") = Some(delay);
    }

    pub fn recorded_queries(&self) -> Vec<(String, Query)> {
        self.state().queries.clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceResolver for MemoryLibrary {
    async fn resolve(&self, source_id: &str) -> Result<SourceListing, LookupError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .sources
            .iter()
            .find(|s| s.source_id == source_id)
            .cloned()
            .ok_or_else(|| LookupError::NoSuchSource(source_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<SourceListing>, LookupError> {
        Ok(self.state().sources.clone())
    }

    async fn runtime_version(&self, source_id: &str) -> Result<Option<u32>, LookupError> {
        Ok(self.state().versions.get(source_id).copied())
    }

    async fn icon(&self, icon_ref: &str) -> Result<Bytes, LookupError> {
        self.state()
            .icons
            .get(icon_ref)
            .cloned()
            .ok_or_else(|| LookupError::Failed(format!("no icon {icon_ref}")))
    }
}

#[async_trait]
impl ContentStore for MemoryLibrary {
    async fn lookup(&self, source_id: &str, content_id: &str) -> Result<ContentRecord, LookupError> {
        let stored = {
            let state = self.state();
            if !state.sources.iter().any(|s| s.source_id == source_id) {
                return Err(LookupError::NoSuchSource(source_id.to_string()));
            }
            state
                .content
                .get(&(source_id.to_string(), content_id.to_string()))
                .cloned()
        };
        let stored = stored.ok_or_else(|| LookupError::NoSuchContent {
            source_id: source_id.to_string(),
            content_id: content_id.to_string(),
        })?;
        Ok(ContentRecord {
            metadata: Bytes::from(stored.metadata.to_string()),
            data: ContentBlob::from_bytes(stored.data),
        })
    }

    async fn link_tables(&self, source_id: &str) -> Result<Vec<LinkTable>, LookupError> {
        Ok(self
            .state()
            .link_tables
            .get(source_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl QueryService for MemoryLibrary {
    async fn query(
        &self,
        source: &SourceListing,
        query: &Query,
    ) -> Result<Vec<ContentDescriptor>, QueryError> {
        let delay = *self.query_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.queries.push((source.source_id.clone(), query.clone()));
        let matched = state
            .query_results
            .get(&source.source_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(matched
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }
}
