//! Federated search: query every relevant source, merge, sort by display
//! name and cut the requested window out of the merged list.

use std::collections::HashSet;
use std::sync::Arc;

use companion_protocol::{
    ApplicationMatch, ContentDescriptor, ContentMatch, Query, SearchResultEntry, SetMatch,
    SourceListing, ARTICLE_OBJECT_TAG, SET_OBJECT_TAG,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fanout::fan_out;
use crate::sources::{LookupError, QueryError, QueryService, SourceResolver};
use crate::uris::UriScope;

/// Local limit used when a single-source query would otherwise be unbounded.
pub const DEFAULT_LOCAL_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub source_id: Option<String>,
    pub tags: Option<Vec<String>>,
    pub search_term: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SearchRequest {
    /// At least one of source, tags or search term must narrow the search.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.source_id.is_none() && self.tags.is_none() && self.search_term.is_none() {
            return Err(SearchError::InvalidRequest(
                "one of applicationId, tags or searchTerm is required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub remaining: usize,
    /// Sources referenced by the window or matched by name, in source order.
    pub sources: Vec<SourceListing>,
    pub results: Vec<SearchResultEntry>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("invalid search request: {0}")]
    InvalidRequest(String),
    #[error("unknown application {source_id}")]
    InvalidSource { source_id: String },
    #[error("search cancelled")]
    Cancelled,
    #[error("search failed: {0}")]
    Failed(String),
}

struct Plan {
    sources: Vec<SourceListing>,
    local_limit: Option<usize>,
    local_offset: Option<usize>,
    window_offset: usize,
    window_limit: Option<usize>,
}

pub struct SearchReconciler {
    resolver: Arc<dyn SourceResolver>,
    index: Arc<dyn QueryService>,
}

impl SearchReconciler {
    pub fn new(resolver: Arc<dyn SourceResolver>, index: Arc<dyn QueryService>) -> Self {
        Self { resolver, index }
    }

    pub async fn search(
        &self,
        request: &SearchRequest,
        scope: &UriScope,
    ) -> Result<SearchOutcome, SearchError> {
        request.validate()?;
        let plan = self.plan(request).await?;

        let query = Query {
            tags_match_any: Some(request.tags.clone().unwrap_or_else(|| {
                vec![ARTICLE_OBJECT_TAG.to_string(), SET_OBJECT_TAG.to_string()]
            })),
            tags_match_all: None,
            search_term: request.search_term.clone(),
            limit: Some(plan.local_limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LOCAL_LIMIT)),
            offset: Some(plan.local_offset.unwrap_or(0)),
        };
        let outcomes = fan_out(
            plan.sources
                .iter()
                .map(|source| self.index.query(source, &query)),
        )
        .await;

        let mut failed: HashSet<&str> = HashSet::new();
        let mut content: Vec<(&SourceListing, ContentDescriptor)> = Vec::new();
        for (source, outcome) in plan.sources.iter().zip(outcomes) {
            match outcome {
                Ok(descriptors) => {
                    content.extend(descriptors.into_iter().map(|d| (source, d)));
                }
                Err(QueryError::ContentDefect { message, .. }) => {
                    warn!(source = %source.source_id, %message, "excluding source from search");
                    failed.insert(source.source_id.as_str());
                }
                Err(QueryError::InvalidArguments(message)) => {
                    return Err(SearchError::InvalidRequest(message));
                }
                Err(QueryError::Cancelled) => return Err(SearchError::Cancelled),
            }
        }

        let named: Vec<&SourceListing> = match request.search_term.as_deref() {
            Some(term) => plan
                .sources
                .iter()
                .filter(|s| !failed.contains(s.source_id.as_str()))
                .filter(|s| name_matches(&s.display_name, term))
                .collect(),
            None => Vec::new(),
        };

        let mut merged: Vec<SearchResultEntry> = named
            .iter()
            .map(|source| SearchResultEntry::Application {
                display_name: source.display_name.clone(),
                payload: ApplicationMatch {
                    application_id: source.source_id.clone(),
                },
            })
            .chain(
                content
                    .into_iter()
                    .map(|(source, descriptor)| content_entry(source, descriptor, scope)),
            )
            .collect();
        // Stable: ties keep the order above.
        merged.sort_by(|a, b| a.display_name().cmp(b.display_name()));

        let total = merged.len();
        let start = plan.window_offset.min(total);
        let end = match plan.window_limit {
            Some(limit) => start.saturating_add(limit).min(total),
            None => total,
        };
        let remaining = match plan.window_limit {
            Some(limit) => total.saturating_sub(plan.window_offset.saturating_add(limit)),
            None => 0,
        };
        let results: Vec<SearchResultEntry> = merged.drain(start..end).collect();

        let relevant: HashSet<&str> = results
            .iter()
            .map(SearchResultEntry::application_id)
            .chain(named.iter().map(|s| s.source_id.as_str()))
            .collect();
        let sources = plan
            .sources
            .iter()
            .filter(|s| relevant.contains(s.source_id.as_str()))
            .cloned()
            .collect();

        debug!(total, window = results.len(), remaining, "search reconciled");
        Ok(SearchOutcome {
            remaining,
            sources,
            results,
        })
    }

    async fn plan(&self, request: &SearchRequest) -> Result<Plan, SearchError> {
        match request.source_id.as_deref() {
            Some(source_id) => {
                let listing = self
                    .resolver
                    .resolve(source_id)
                    .await
                    .map_err(|err| match err {
                        LookupError::NoSuchSource(_) => SearchError::InvalidSource {
                            source_id: source_id.to_string(),
                        },
                        other => SearchError::Failed(other.to_string()),
                    })?;
                // The backend paginates a single source itself.
                Ok(Plan {
                    sources: vec![listing],
                    local_limit: request.limit,
                    local_offset: request.offset,
                    window_offset: 0,
                    window_limit: None,
                })
            }
            None => {
                let sources = self
                    .resolver
                    .list()
                    .await
                    .map_err(|err| SearchError::Failed(err.to_string()))?;
                // Each source must return everything up to the end of the
                // global window; the window is cut after merging. Without a
                // global limit the window runs DEFAULT_LOCAL_LIMIT past the
                // offset.
                let offset = request.offset.unwrap_or(0);
                let window_end = request.limit.unwrap_or(DEFAULT_LOCAL_LIMIT) + offset;
                Ok(Plan {
                    sources,
                    local_limit: Some(window_end),
                    local_offset: Some(0),
                    window_offset: offset,
                    window_limit: request.limit,
                })
            }
        }
    }
}

/// Case-insensitive substring match of `term` in `name`.
fn name_matches(name: &str, term: &str) -> bool {
    let term = term.trim();
    !term.is_empty() && name.to_lowercase().contains(&term.to_lowercase())
}

fn content_entry(
    source: &SourceListing,
    descriptor: ContentDescriptor,
    scope: &UriScope,
) -> SearchResultEntry {
    let application_id = source.source_id.clone();
    let thumbnail = descriptor
        .thumbnail_ref
        .as_deref()
        .map(|t| scope.thumbnail(&source.source_id, t));
    if descriptor.is_set() {
        SearchResultEntry::Set {
            display_name: descriptor.display_title,
            payload: SetMatch {
                application_id,
                tags: descriptor.child_tags,
                thumbnail,
            },
        }
    } else {
        SearchResultEntry::Content {
            display_name: descriptor.display_title,
            payload: ContentMatch {
                application_id,
                content_type: descriptor.content_type,
                id: descriptor.id,
                tags: descriptor.tags.into_iter().collect(),
                thumbnail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{article, listing, MemoryLibrary};

    fn reconciler(library: &Arc<MemoryLibrary>) -> SearchReconciler {
        SearchReconciler::new(library.clone(), library.clone())
    }

    fn scope() -> UriScope {
        UriScope::new("v2", "dev")
    }

    fn titles(outcome: &SearchOutcome) -> Vec<&str> {
        outcome.results.iter().map(|r| r.display_name()).collect()
    }

    #[tokio::test]
    async fn global_window_is_cut_after_merge() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.a", "Alpha App"));
        library.add_source(listing("com.example.b", "Beta App"));
        library.set_query_results(
            "com.example.a",
            Ok(vec![article("a1", "Apple"), article("a2", "Cherry"), article("a3", "Elder")]),
        );
        library.set_query_results(
            "com.example.b",
            Ok(vec![article("b1", "Banana"), article("b2", "Date")]),
        );

        let request = SearchRequest {
            tags: Some(vec!["EknArticleObject".into()]),
            limit: Some(2),
            offset: Some(3),
            ..SearchRequest::default()
        };
        let outcome = reconciler(&library).search(&request, &scope()).await.unwrap();

        assert_eq!(titles(&outcome), vec!["Date", "Elder"]);
        assert_eq!(outcome.remaining, 0);
        let ids: Vec<&str> = outcome.sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["com.example.a", "com.example.b"]);

        let queries = library.recorded_queries();
        assert_eq!(queries.len(), 2);
        for (_, query) in queries {
            assert_eq!(query.limit, Some(5));
            assert_eq!(query.offset, Some(0));
            assert_eq!(query.tags_match_any, Some(vec!["EknArticleObject".to_string()]));
        }
    }

    fn items(prefix: &str, count: usize) -> Vec<ContentDescriptor> {
        (0..count)
            .map(|i| article(&format!("{prefix}{i}"), &format!("Item {prefix}{i}")))
            .collect()
    }

    #[tokio::test]
    async fn remaining_counts_entries_past_the_window() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.a", "Alpha"));
        library.add_source(listing("com.example.b", "Beta"));
        library.set_query_results("com.example.a", Ok(items("A", 6)));
        library.set_query_results("com.example.b", Ok(items("B", 6)));
        let request = SearchRequest {
            search_term: Some("item".into()),
            limit: Some(2),
            offset: Some(1),
            ..SearchRequest::default()
        };
        let outcome = reconciler(&library).search(&request, &scope()).await.unwrap();
        // Each source answers its first three; A0..A2 then B0..B2 after merge.
        assert_eq!(titles(&outcome), vec!["Item A1", "Item A2"]);
        assert_eq!(outcome.remaining, 3);
    }

    #[tokio::test]
    async fn offset_without_limit_keeps_the_tail() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.a", "Alpha"));
        library.set_query_results("com.example.a", Ok(items("A", 10)));
        let request = SearchRequest {
            tags: Some(vec![ARTICLE_OBJECT_TAG.into()]),
            offset: Some(3),
            ..SearchRequest::default()
        };
        let outcome = reconciler(&library).search(&request, &scope()).await.unwrap();
        let expected: Vec<String> = (3..10).map(|i| format!("Item A{i}")).collect();
        assert_eq!(titles(&outcome), expected);
        assert_eq!(outcome.remaining, 0);
        let (_, query) = &library.recorded_queries()[0];
        assert_eq!((query.limit, query.offset), (Some(DEFAULT_LOCAL_LIMIT + 3), Some(0)));
    }

    #[tokio::test]
    async fn window_is_exact_against_a_paging_backend() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.a", "Alpha"));
        library.add_source(listing("com.example.b", "Beta"));
        library.set_query_results("com.example.a", Ok(items("A", 4)));
        library.set_query_results("com.example.b", Ok(items("B", 4)));
        let request = SearchRequest {
            tags: Some(vec![ARTICLE_OBJECT_TAG.into()]),
            limit: Some(3),
            offset: Some(2),
            ..SearchRequest::default()
        };
        let outcome = reconciler(&library).search(&request, &scope()).await.unwrap();
        // Full merge would be A0..A3 B0..B3; the window is [2, 5).
        assert_eq!(titles(&outcome), vec!["Item A2", "Item A3", "Item B0"]);
        assert_eq!(outcome.remaining, 3);
    }

    #[tokio::test]
    async fn failed_source_is_excluded() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.bad", "Broken Things"));
        library.add_source(listing("com.example.good", "Good Things"));
        library.set_query_results(
            "com.example.bad",
            Err(QueryError::ContentDefect {
                source_id: "com.example.bad".into(),
                message: "shard missing".into(),
            }),
        );
        library.set_query_results("com.example.good", Ok(vec![article("g1", "Thing One")]));

        let request = SearchRequest {
            search_term: Some("things".into()),
            ..SearchRequest::default()
        };
        let outcome = reconciler(&library).search(&request, &scope()).await.unwrap();

        assert!(outcome
            .results
            .iter()
            .all(|r| r.application_id() == "com.example.good"));
        assert_eq!(titles(&outcome), vec!["Good Things", "Thing One"]);
        let ids: Vec<&str> = outcome.sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["com.example.good"]);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_search() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.a", "Alpha"));
        library.add_source(listing("com.example.b", "Beta"));
        library.set_query_results("com.example.a", Ok(vec![article("a1", "One")]));
        library.set_query_results("com.example.b", Err(QueryError::Cancelled));
        let request = SearchRequest {
            search_term: Some("x".into()),
            ..SearchRequest::default()
        };
        let err = reconciler(&library).search(&request, &scope()).await.unwrap_err();
        assert_eq!(err, SearchError::Cancelled);
    }

    #[tokio::test]
    async fn single_source_trusts_backend_pagination() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.a", "Alpha"));
        library.set_query_results("com.example.a", Ok(items("A", 6)));
        let request = SearchRequest {
            source_id: Some("com.example.a".into()),
            limit: Some(10),
            offset: Some(4),
            ..SearchRequest::default()
        };
        let outcome = reconciler(&library).search(&request, &scope()).await.unwrap();
        assert_eq!(titles(&outcome), vec!["Item A4", "Item A5"]);
        assert_eq!(outcome.remaining, 0);
        let (_, query) = &library.recorded_queries()[0];
        assert_eq!((query.limit, query.offset), (Some(10), Some(4)));
        assert_eq!(
            query.tags_match_any,
            Some(vec![ARTICLE_OBJECT_TAG.to_string(), SET_OBJECT_TAG.to_string()])
        );
    }

    #[tokio::test]
    async fn unknown_single_source_is_invalid() {
        let library = Arc::new(MemoryLibrary::new());
        let request = SearchRequest {
            source_id: Some("com.example.missing".into()),
            ..SearchRequest::default()
        };
        let err = reconciler(&library).search(&request, &scope()).await.unwrap_err();
        assert_eq!(
            err,
            SearchError::InvalidSource {
                source_id: "com.example.missing".into()
            }
        );
    }

    #[tokio::test]
    async fn request_needs_a_filter() {
        let library = Arc::new(MemoryLibrary::new());
        let err = reconciler(&library)
            .search(&SearchRequest::default(), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn sets_and_thumbnails_use_set_payload() {
        let library = Arc::new(MemoryLibrary::new());
        library.add_source(listing("com.example.a", "Alpha"));
        let mut set = article("s1", "Birds");
        set.tags.insert(SET_OBJECT_TAG.to_string());
        set.child_tags = vec!["birds".into()];
        set.thumbnail_ref = Some("ekn:///ff01".into());
        library.set_query_results("com.example.a", Ok(vec![set]));
        let request = SearchRequest {
            tags: Some(vec![SET_OBJECT_TAG.into()]),
            ..SearchRequest::default()
        };
        let outcome = reconciler(&library).search(&request, &scope()).await.unwrap();
        match &outcome.results[0] {
            SearchResultEntry::Set { payload, .. } => {
                assert_eq!(payload.tags, vec!["birds".to_string()]);
                assert_eq!(
                    payload.thumbnail.as_deref(),
                    Some("/v2/content_data?deviceUUID=dev&applicationId=com.example.a&contentId=ff01")
                );
            }
            other => panic!("expected a set entry, got {other:?}"),
        }
    }

    #[test]
    fn name_match_is_case_insensitive_substring() {
        assert!(name_matches("Encyclopedia Galactica", "galact"));
        assert!(!name_matches("Encyclopedia", "cars"));
        assert!(!name_matches("Encyclopedia", "  "));
    }
}
