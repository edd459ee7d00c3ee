//! Content adjusters: rewrite buffered payloads before they are sent.
//!
//! An adjuster declares which content kinds it touches. The responder asks
//! first and only buffers a payload when the answer is yes; everything else
//! is streamed straight through.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::sources::{LookupError, QueryError};
use crate::uris::UriScope;

mod license;
mod rewrite;
mod shard;

pub use license::LicenseAdjuster;
pub use rewrite::{
    normalize, rewrite_content_refs, rewrite_css_urls, rewrite_license_refs,
    rewrite_relative_refs, rewrite_resource_refs,
};
pub use shard::{ShardContentAdjuster, WRAPPER_MARKER};

/// Content kinds an adjuster can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentTag {
    Html,
    Css,
}

impl ContentTag {
    /// Classify a MIME type, ignoring parameters and case.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("text/html") {
            Some(ContentTag::Html)
        } else if essence.eq_ignore_ascii_case("text/css") {
            Some(ContentTag::Css)
        } else {
            None
        }
    }
}

/// Adjusters that can be requested by name on the resource route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjusterKind {
    License,
}

impl AdjusterKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "license" => Some(AdjusterKind::License),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdjusterKind::License => "license",
        }
    }
}

/// Per-request inputs to an adjuster.
#[derive(Debug, Clone)]
pub struct AdjustContext {
    pub scope: UriScope,
}

impl AdjustContext {
    pub fn new(scope: UriScope) -> Self {
        Self { scope }
    }
}

#[derive(Debug, Error)]
pub enum AdjustError {
    #[error("content is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("wrapper rendering failed: {0}")]
    Render(String),
    #[error("wrapper data could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[async_trait]
pub trait ContentAdjuster: Send + Sync {
    /// Whether payloads of `content_type` must be buffered and rendered.
    fn needs_adjustment(&self, content_type: &str) -> bool;

    async fn render(
        &self,
        content_type: &str,
        content: Bytes,
        ctx: &AdjustContext,
    ) -> Result<Bytes, AdjustError>;
}
