//! Content sources laid out on the local filesystem.
//!
//! ```text
//! <root>/<source_id>/source.json        manifest
//! <root>/<source_id>/icon.png           optional icon
//! <root>/<source_id>/links.json         optional link table(s)
//! <root>/<source_id>/content/<id>.json  metadata
//! <root>/<source_id>/content/<id>.data  payload
//! ```

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use companion_protocol::{ContentDescriptor, ContentMetadata, Query, SourceListing};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::sources::{
    ContentBlob, ContentRecord, ContentStore, LinkTable, LookupError, QueryError, QueryService,
    SourceResolver,
};

const MANIFEST: &str = "source.json";
const LINKS: &str = "links.json";
const ICON: &str = "icon.png";
const CONTENT_DIR: &str = "content";

#[derive(Debug, Deserialize)]
struct SourceManifest {
    display_name: String,
    #[serde(default)]
    short_description: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    runtime_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinksFile {
    One(LinkTable),
    Many(Vec<LinkTable>),
}

#[derive(Debug, Clone)]
pub struct FsContentLibrary {
    root: PathBuf,
}

impl FsContentLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_dir(&self, source_id: &str) -> Result<PathBuf, LookupError> {
        if !is_safe_segment(source_id) {
            return Err(LookupError::NoSuchSource(source_id.to_string()));
        }
        Ok(self.root.join(source_id))
    }

    async fn manifest(&self, source_id: &str) -> Result<SourceManifest, LookupError> {
        let path = self.source_dir(source_id)?.join(MANIFEST);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(LookupError::NoSuchSource(source_id.to_string()));
            }
            Err(err) => return Err(LookupError::Failed(format!("{}: {err}", path.display()))),
        };
        serde_json::from_slice(&raw)
            .map_err(|err| LookupError::Failed(format!("{}: {err}", path.display())))
    }

    fn listing(source_id: &str, manifest: SourceManifest) -> SourceListing {
        SourceListing {
            source_id: source_id.to_string(),
            display_name: manifest.display_name,
            short_description: manifest.short_description,
            icon_ref: manifest.icon.unwrap_or_else(|| source_id.to_string()),
            language: manifest.language,
        }
    }
}

#[async_trait]
impl SourceResolver for FsContentLibrary {
    async fn resolve(&self, source_id: &str) -> Result<SourceListing, LookupError> {
        let manifest = self.manifest(source_id).await?;
        Ok(Self::listing(source_id, manifest))
    }

    async fn list(&self) -> Result<Vec<SourceListing>, LookupError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(LookupError::Failed(format!("{}: {err}", self.root.display())));
            }
        };
        let mut ids = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| LookupError::Failed(err.to_string()))?
        {
            if let Some(name) = entry.file_name().to_str() {
                ids.insert(name.to_string());
            }
        }

        let mut listings = Vec::with_capacity(ids.len());
        for id in ids {
            match self.manifest(&id).await {
                Ok(manifest) => listings.push(Self::listing(&id, manifest)),
                Err(LookupError::NoSuchSource(_)) => {}
                Err(err) => warn!(source = %id, %err, "skipping unreadable source"),
            }
        }
        Ok(listings)
    }

    async fn runtime_version(&self, source_id: &str) -> Result<Option<u32>, LookupError> {
        Ok(self.manifest(source_id).await?.runtime_version)
    }

    async fn icon(&self, icon_ref: &str) -> Result<Bytes, LookupError> {
        let path = self.source_dir(icon_ref)?.join(ICON);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|err| LookupError::Failed(format!("{}: {err}", path.display())))
    }
}

#[async_trait]
impl ContentStore for FsContentLibrary {
    async fn lookup(&self, source_id: &str, content_id: &str) -> Result<ContentRecord, LookupError> {
        let source_dir = self.source_dir(source_id)?;
        if !tokio::fs::try_exists(&source_dir).await.unwrap_or(false) {
            return Err(LookupError::NoSuchSource(source_id.to_string()));
        }
        let missing = || LookupError::NoSuchContent {
            source_id: source_id.to_string(),
            content_id: content_id.to_string(),
        };
        if !is_safe_segment(content_id) {
            return Err(missing());
        }
        let content_dir = source_dir.join(CONTENT_DIR);
        let metadata = match tokio::fs::read(content_dir.join(format!("{content_id}.json"))).await {
            Ok(raw) => Bytes::from(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(missing()),
            Err(err) => return Err(LookupError::Failed(err.to_string())),
        };
        let data = match ContentBlob::open(&content_dir.join(format!("{content_id}.data"))).await {
            Ok(blob) => blob,
            Err(err) if err.kind() == ErrorKind::NotFound => ContentBlob::from_bytes(Bytes::new()),
            Err(err) => return Err(LookupError::Failed(err.to_string())),
        };
        Ok(ContentRecord { metadata, data })
    }

    async fn link_tables(&self, source_id: &str) -> Result<Vec<LinkTable>, LookupError> {
        let path = self.source_dir(source_id)?.join(LINKS);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LookupError::Failed(err.to_string())),
        };
        match serde_json::from_slice::<LinksFile>(&raw) {
            Ok(LinksFile::One(table)) => Ok(vec![table]),
            Ok(LinksFile::Many(tables)) => Ok(tables),
            Err(err) => Err(LookupError::Failed(format!("{}: {err}", path.display()))),
        }
    }
}

#[async_trait]
impl QueryService for FsContentLibrary {
    async fn query(
        &self,
        source: &SourceListing,
        query: &Query,
    ) -> Result<Vec<ContentDescriptor>, QueryError> {
        let defect = |message: String| QueryError::ContentDefect {
            source_id: source.source_id.clone(),
            message,
        };
        let content_dir = self
            .source_dir(&source.source_id)
            .map_err(|err| defect(err.to_string()))?
            .join(CONTENT_DIR);
        let mut entries = match tokio::fs::read_dir(&content_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(defect(err.to_string())),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| defect(err.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut matched = Vec::new();
        for path in paths {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|err| defect(err.to_string()))?;
            let metadata: ContentMetadata = serde_json::from_slice(&raw)
                .map_err(|err| defect(format!("{}: {err}", path.display())))?;
            let descriptor = descriptor_from_metadata(id, metadata);
            if matches_query(&descriptor, query) {
                matched.push(descriptor);
            }
        }

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        let page: Vec<ContentDescriptor> = matched.into_iter().skip(offset).take(limit).collect();
        debug!(source = %source.source_id, hits = page.len(), "filesystem query");
        Ok(page)
    }
}

fn descriptor_from_metadata(id: String, mut metadata: ContentMetadata) -> ContentDescriptor {
    let child_tags = metadata
        .extra
        .remove("childTags")
        .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .unwrap_or_default();
    ContentDescriptor {
        id,
        content_type: metadata.content_type,
        tags: metadata.tags.into_iter().collect(),
        display_title: metadata.title,
        thumbnail_ref: metadata.thumbnail,
        child_tags,
        extra_metadata: metadata.extra,
    }
}

fn matches_query(descriptor: &ContentDescriptor, query: &Query) -> bool {
    if let Some(all) = &query.tags_match_all {
        if !all.iter().all(|t| descriptor.tags.contains(t)) {
            return false;
        }
    }
    if let Some(any) = &query.tags_match_any {
        if !any.iter().any(|t| descriptor.tags.contains(t)) {
            return false;
        }
    }
    if let Some(term) = query.search_term.as_deref() {
        let title = descriptor.display_title.to_lowercase();
        if !term
            .split_whitespace()
            .all(|word| title.contains(&word.to_lowercase()))
        {
            return false;
        }
    }
    true
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}
