use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{rewrite_css_urls, rewrite_relative_refs, AdjustContext, AdjustError, ContentAdjuster, ContentTag};

/// Rewrites the relative references inside license documents and their
/// stylesheets so they resolve through the resource route.
#[derive(Debug, Clone)]
pub struct LicenseAdjuster {
    base_dir: PathBuf,
}

impl LicenseAdjuster {
    /// `source_path` is the on-disk location of the document being served.
    pub fn for_document(source_path: &Path) -> Self {
        let base_dir = source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self { base_dir }
    }
}

#[async_trait]
impl ContentAdjuster for LicenseAdjuster {
    fn needs_adjustment(&self, content_type: &str) -> bool {
        ContentTag::from_mime(content_type).is_some()
    }

    async fn render(
        &self,
        content_type: &str,
        content: Bytes,
        ctx: &AdjustContext,
    ) -> Result<Bytes, AdjustError> {
        let text = String::from_utf8(content.to_vec())?;
        let out = match ContentTag::from_mime(content_type) {
            Some(ContentTag::Html) => rewrite_relative_refs(&text, &self.base_dir, &ctx.scope).into_owned(),
            Some(ContentTag::Css) => rewrite_css_urls(&text, &self.base_dir, &ctx.scope).into_owned(),
            None => return Ok(Bytes::from(text)),
        };
        Ok(Bytes::from(out))
    }
}
