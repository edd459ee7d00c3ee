//! Memoizing [`SourceResolver`] wrapper.
//!
//! Listings are cached with a TTL and dropped wholesale on `invalidate()`,
//! which the library watcher calls when installed sources change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use companion_protocol::SourceListing;
use moka::future::Cache;
use tracing::debug;

use crate::sources::{LookupError, SourceResolver};

const LISTING_CAPACITY: u64 = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

pub struct CachedSourceResolver {
    inner: Arc<dyn SourceResolver>,
    listings: Cache<String, SourceListing>,
    all: Cache<(), Arc<Vec<SourceListing>>>,
    versions: Cache<String, Option<u32>>,
    counters: Counters,
}

impl CachedSourceResolver {
    pub fn new(inner: Arc<dyn SourceResolver>, ttl: Duration) -> Self {
        let ttl = ttl.max(Duration::from_secs(1));
        Self {
            inner,
            listings: Cache::builder()
                .max_capacity(LISTING_CAPACITY)
                .time_to_live(ttl)
                .build(),
            all: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
            versions: Cache::builder()
                .max_capacity(LISTING_CAPACITY)
                .time_to_live(ttl)
                .build(),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> SourceCacheStats {
        SourceCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl SourceResolver for CachedSourceResolver {
    async fn resolve(&self, source_id: &str) -> Result<SourceListing, LookupError> {
        if let Some(listing) = self.listings.get(source_id).await {
            self.record(true);
            return Ok(listing);
        }
        self.record(false);
        // Misses are not cached so a newly installed source shows up at once.
        let listing = self.inner.resolve(source_id).await?;
        self.listings
            .insert(source_id.to_string(), listing.clone())
            .await;
        Ok(listing)
    }

    async fn list(&self) -> Result<Vec<SourceListing>, LookupError> {
        if let Some(all) = self.all.get(&()).await {
            self.record(true);
            return Ok(all.as_ref().clone());
        }
        self.record(false);
        let all = self.inner.list().await?;
        for listing in &all {
            self.listings
                .insert(listing.source_id.clone(), listing.clone())
                .await;
        }
        self.all.insert((), Arc::new(all.clone())).await;
        Ok(all)
    }

    async fn runtime_version(&self, source_id: &str) -> Result<Option<u32>, LookupError> {
        if let Some(version) = self.versions.get(source_id).await {
            self.record(true);
            return Ok(version);
        }
        self.record(false);
        let version = self.inner.runtime_version(source_id).await?;
        self.versions.insert(source_id.to_string(), version).await;
        Ok(version)
    }

    async fn icon(&self, icon_ref: &str) -> Result<Bytes, LookupError> {
        self.inner.icon(icon_ref).await
    }

    fn invalidate(&self) {
        self.listings.invalidate_all();
        self.all.invalidate_all();
        self.versions.invalidate_all();
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        self.inner.invalidate();
        debug!("source cache invalidated");
    }
}
