use std::sync::Arc;

use askama::Template;
use async_trait::async_trait;
use bytes::Bytes;
use companion_protocol::{ContentMetadata, Query, SourceListing, SET_OBJECT_TAG};
use serde::Serialize;
use tracing::debug;

use super::{
    rewrite_content_refs, rewrite_license_refs, rewrite_resource_refs, AdjustContext, AdjustError,
    ContentAdjuster, ContentTag,
};
use crate::sources::{ContentStore, LinkTable, QueryService};
use crate::uris::{content_id_from_ref, UriScope};

/// Element id present in every wrapped document.
pub const WRAPPER_MARKER: &str = "companion-article-wrapper";

const WRAPPER_CSS: &[&str] = &["clipboard.css", "share-actions.css"];
const WRAPPER_JS: &[&str] = &["jquery-min.js", "collapse-infotable.js", "crosslink.js"];
const SET_QUERY_LIMIT: usize = 500;

#[derive(Template)]
#[template(path = "article-wrapper.html")]
struct ArticleWrapper<'a> {
    title: &'a str,
    content: &'a str,
    crosslink_data: &'a str,
    content_metadata: &'a str,
    css_files: &'a [&'a str],
    js_files: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct WrapperMetadata<'a> {
    title: &'a str,
    published: &'a str,
    authors: &'a [String],
    license: &'a str,
    source: &'a str,
    source_name: &'a str,
    #[serde(rename = "originalURI")]
    original_uri: &'a str,
    sets: Vec<WrapperSet>,
}

#[derive(Debug, Serialize)]
struct WrapperSet {
    child_tags: Vec<String>,
    id: String,
    title: String,
    tags: Vec<String>,
}

/// HTML adjuster for documents stored in a content source.
///
/// Wraps the body in the article template (unless the source already did),
/// then points every embedded content, resource and license reference back
/// at this server.
pub struct ShardContentAdjuster {
    metadata: ContentMetadata,
    source: SourceListing,
    store: Arc<dyn ContentStore>,
    index: Arc<dyn QueryService>,
}

impl ShardContentAdjuster {
    pub fn new(
        metadata: ContentMetadata,
        source: SourceListing,
        store: Arc<dyn ContentStore>,
        index: Arc<dyn QueryService>,
    ) -> Self {
        Self {
            metadata,
            source,
            store,
            index,
        }
    }

    async fn wrap(&self, body: &str, scope: &UriScope) -> Result<String, AdjustError> {
        let tables = self.store.link_tables(&self.source.source_id).await?;
        let crosslinks: Vec<Option<String>> = self
            .metadata
            .outgoing_links
            .iter()
            .map(|link| {
                resolve_outgoing_link(&tables, link)
                    .map(|target| scope.content_data(&self.source.source_id, content_id_from_ref(target)))
            })
            .collect();

        let set_query = Query {
            tags_match_all: Some(vec![SET_OBJECT_TAG.to_string()]),
            limit: Some(SET_QUERY_LIMIT),
            ..Query::default()
        };
        let sets = self.index.query(&self.source, &set_query).await?;
        let own_tags: Vec<&String> = self
            .metadata
            .tags
            .iter()
            .filter(|tag| !tag.starts_with("Ekn"))
            .collect();
        let sets = sets
            .into_iter()
            .filter(|set| own_tags.iter().any(|tag| set.child_tags.contains(*tag)))
            .map(|set| WrapperSet {
                child_tags: set.child_tags,
                id: set.id,
                title: set.display_title,
                tags: set.tags.into_iter().collect(),
            })
            .collect();

        let meta = &self.metadata;
        let wrapper_meta = WrapperMetadata {
            title: &meta.title,
            published: meta.published.as_deref().unwrap_or_default(),
            authors: &meta.authors,
            license: meta.license.as_deref().unwrap_or_default(),
            source: meta.source.as_deref().unwrap_or_default(),
            source_name: meta.source_name.as_deref().unwrap_or_default(),
            original_uri: meta.original_uri.as_deref().unwrap_or_default(),
            sets,
        };

        let fallback_title;
        let title = if meta.title.is_empty() {
            fallback_title = format!("Content from {}", self.source.source_id);
            fallback_title.as_str()
        } else {
            meta.title.as_str()
        };
        let crosslink_data = script_json(&serde_json::to_string(&crosslinks)?);
        let content_metadata = script_json(&serde_json::to_string(&wrapper_meta)?);

        ArticleWrapper {
            title,
            content: body,
            crosslink_data: &crosslink_data,
            content_metadata: &content_metadata,
            css_files: WRAPPER_CSS,
            js_files: WRAPPER_JS,
        }
        .render()
        .map_err(|err| AdjustError::Render(err.to_string()))
    }
}

#[async_trait]
impl ContentAdjuster for ShardContentAdjuster {
    fn needs_adjustment(&self, content_type: &str) -> bool {
        ContentTag::from_mime(content_type) == Some(ContentTag::Html)
    }

    async fn render(
        &self,
        _content_type: &str,
        content: Bytes,
        ctx: &AdjustContext,
    ) -> Result<Bytes, AdjustError> {
        let body = String::from_utf8(content.to_vec())?;
        let page = if self.metadata.is_server_templated {
            debug!(source = %self.source.source_id, "document is pre-templated; skipping wrapper");
            body
        } else {
            self.wrap(&body, &ctx.scope).await?
        };

        let page = rewrite_content_refs(&page, &ctx.scope, &self.source.source_id).into_owned();
        let page = rewrite_resource_refs(&page, &ctx.scope).into_owned();
        let page = rewrite_license_refs(&page, &ctx.scope).into_owned();
        Ok(Bytes::from(page))
    }
}

/// First table holding `link` wins.
pub(crate) fn resolve_outgoing_link<'a>(tables: &'a [LinkTable], link: &str) -> Option<&'a str> {
    tables
        .iter()
        .find_map(|table| table.get(link))
        .map(String::as_str)
}

// Keep `</script>` inside JSON from closing the surrounding script element.
fn script_json(json: &str) -> String {
    json.replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryLibrary;
    use companion_protocol::ContentDescriptor;
    use std::collections::BTreeSet;

    fn listing() -> SourceListing {
        SourceListing {
            source_id: "com.example.wiki".into(),
            display_name: "Wiki".into(),
            short_description: String::new(),
            icon_ref: "com.example.wiki".into(),
            language: None,
        }
    }

    fn set(id: &str, child_tag: &str) -> ContentDescriptor {
        ContentDescriptor {
            id: id.into(),
            content_type: companion_protocol::SET_CONTENT_TYPE.into(),
            tags: BTreeSet::from([SET_OBJECT_TAG.to_string()]),
            display_title: format!("Set {id}"),
            thumbnail_ref: None,
            child_tags: vec![child_tag.into()],
            extra_metadata: Default::default(),
        }
    }

    fn adjuster(metadata: ContentMetadata, library: Arc<MemoryLibrary>) -> ShardContentAdjuster {
        ShardContentAdjuster::new(metadata, listing(), library.clone(), library)
    }

    fn ctx() -> AdjustContext {
        AdjustContext::new(UriScope::new("v1", "dev"))
    }

    #[tokio::test]
    async fn wraps_and_rewrites_document() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing());
        library.add_link_table(
            "com.example.wiki",
            [("https://en.wikipedia.org/wiki/Owl".to_string(), "ekn:///aa11".to_string())],
        );
        library.set_query_results(
            "com.example.wiki",
            Ok(vec![set("s1", "birds"), set("s2", "cars")]),
        );
        let metadata = ContentMetadata {
            content_type: "text/html".into(),
            title: "Owls".into(),
            tags: vec!["EknArticleObject".into(), "birds".into()],
            outgoing_links: vec![
                "https://en.wikipedia.org/wiki/Owl".into(),
                "https://example.org/unknown".into(),
            ],
            ..ContentMetadata::default()
        };
        let html = r#"<p><a href="ekn://com.example.wiki/bb22">next</a></p>"#;
        let out = adjuster(metadata, library)
            .render("text/html", Bytes::from(html), &ctx())
            .await
            .unwrap();
        let out = String::from_utf8(out.to_vec()).unwrap();

        assert!(out.contains(WRAPPER_MARKER));
        assert!(out.contains("<title>Owls</title>"));
        assert!(out.contains(
            r#"href="/v1/content_data?deviceUUID=dev&applicationId=com.example.wiki&contentId=bb22""#
        ));
        assert!(out.contains(
            r#"["/v1/content_data?deviceUUID=dev&applicationId=com.example.wiki&contentId=aa11",null]"#
        ));
        assert!(out.contains(r#""id":"s1""#));
        assert!(!out.contains(r#""id":"s2""#));
        assert!(out.contains("/v1/resource?deviceUUID=dev&uri=resource%3A%2F%2F%2Fwrapper%2Fcss%2Fclipboard.css"));
        assert!(!out.contains("resource:///"));
    }

    #[tokio::test]
    async fn pre_templated_documents_skip_wrapper() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing());
        let metadata = ContentMetadata {
            content_type: "text/html".into(),
            is_server_templated: true,
            ..ContentMetadata::default()
        };
        let html = r#"<html><img src="resource:///img/a.png"></html>"#;
        let out = adjuster(metadata, library)
            .render("text/html", Bytes::from(html), &ctx())
            .await
            .unwrap();
        let out = String::from_utf8(out.to_vec()).unwrap();
        assert!(!out.contains(WRAPPER_MARKER));
        assert_eq!(
            out,
            r#"<html><img src="/v1/resource?deviceUUID=dev&uri=resource%3A%2F%2F%2Fimg%2Fa.png"></html>"#
        );
    }

    #[tokio::test]
    async fn failed_set_query_surfaces_error() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing());
        library.set_query_results(
            "com.example.wiki",
            Err(crate::sources::QueryError::ContentDefect {
                source_id: "com.example.wiki".into(),
                message: "broken".into(),
            }),
        );
        let metadata = ContentMetadata {
            content_type: "text/html".into(),
            ..ContentMetadata::default()
        };
        let err = adjuster(metadata, library)
            .render("text/html", Bytes::from_static(b"<p>x</p>"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AdjustError::Query(_)));
    }

    #[test]
    fn only_html_needs_adjustment() {
        let library = Arc::new(MemoryLibrary::new());
        let adj = adjuster(ContentMetadata::default(), library);
        assert!(adj.needs_adjustment("text/html; charset=utf-8"));
        assert!(!adj.needs_adjustment("text/css"));
        assert!(!adj.needs_adjustment("image/jpeg"));
    }

    #[test]
    fn link_tables_resolve_in_order() {
        let first: LinkTable = [("a".to_string(), "ekn:///1".to_string())].into();
        let second: LinkTable = [
            ("a".to_string(), "ekn:///2".to_string()),
            ("b".to_string(), "ekn:///3".to_string()),
        ]
        .into();
        let tables = vec![first, second];
        assert_eq!(resolve_outgoing_link(&tables, "a"), Some("ekn:///1"));
        assert_eq!(resolve_outgoing_link(&tables, "b"), Some("ekn:///3"));
        assert_eq!(resolve_outgoing_link(&tables, "c"), None);
    }
}
