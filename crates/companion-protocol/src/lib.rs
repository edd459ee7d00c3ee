use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag carried by every set descriptor.
pub const SET_OBJECT_TAG: &str = "EknSetObject";
/// Tag carried by every article descriptor.
pub const ARTICLE_OBJECT_TAG: &str = "EknArticleObject";
/// Tag used for the synthetic set covering a whole source.
pub const HOME_PAGE_TAG: &str = "EknHomePageTag";
/// Content type reported for synthetic sets.
pub const SET_CONTENT_TYPE: &str = "application/x-ekncontent-set";
/// Domain string carried by every error envelope.
pub const ERROR_DOMAIN: &str = "companion-service-error";
/// Reported by `/version`; clients compare it against their own.
pub const SERVER_API_VERSION: u32 = 2;

/// A content source known to the companion host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceListing {
    pub source_id: String,
    pub display_name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub icon_ref: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// One addressable item as returned by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentDescriptor {
    pub id: String,
    pub content_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub display_title: String,
    #[serde(default)]
    pub thumbnail_ref: Option<String>,
    /// Tags selecting the members of a set. Empty for articles.
    #[serde(default)]
    pub child_tags: Vec<String>,
    #[serde(default)]
    pub extra_metadata: BTreeMap<String, Value>,
}

impl ContentDescriptor {
    pub fn is_set(&self) -> bool {
        self.tags.contains(SET_OBJECT_TAG)
    }
}

/// Request forwarded to the content index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_match_any: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_match_all: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// Metadata document stored alongside each content item.
///
/// Only the fields the server reads are typed; everything else is kept in
/// `extra` so the document can be handed back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default, rename = "originalURI")]
    pub original_uri: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub outgoing_links: Vec<String>,
    #[serde(default)]
    pub is_server_templated: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `type` discriminated search result entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchResultEntry {
    Application {
        #[serde(rename = "displayName")]
        display_name: String,
        payload: ApplicationMatch,
    },
    Set {
        #[serde(rename = "displayName")]
        display_name: String,
        payload: SetMatch,
    },
    Content {
        #[serde(rename = "displayName")]
        display_name: String,
        payload: ContentMatch,
    },
}

impl SearchResultEntry {
    pub fn display_name(&self) -> &str {
        match self {
            SearchResultEntry::Application { display_name, .. }
            | SearchResultEntry::Set { display_name, .. }
            | SearchResultEntry::Content { display_name, .. } => display_name,
        }
    }

    pub fn application_id(&self) -> &str {
        match self {
            SearchResultEntry::Application { payload, .. } => &payload.application_id,
            SearchResultEntry::Set { payload, .. } => &payload.application_id,
            SearchResultEntry::Content { payload, .. } => &payload.application_id,
        }
    }

    pub fn is_application(&self) -> bool {
        matches!(self, SearchResultEntry::Application { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMatch {
    pub application_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetMatch {
    pub application_id: String,
    pub tags: Vec<String>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentMatch {
    pub application_id: String,
    pub content_type: String,
    pub id: String,
    pub tags: Vec<String>,
    pub thumbnail: Option<String>,
}

/// Application summary as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    pub application_id: String,
    pub display_name: String,
    pub short_description: String,
    pub icon: String,
    pub language: Option<String>,
}

/// Payload of a completed search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchPayload {
    pub remaining: usize,
    pub applications: Vec<ApplicationSummary>,
    pub results: Vec<SearchResultEntry>,
}

/// Entry of `/list_application_sets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSet {
    pub tags: Vec<String>,
    pub title: String,
    pub content_type: String,
    pub thumbnail: Option<String>,
    pub id: String,
    /// Synthetic set standing in for a source without any.
    pub global: bool,
}

/// Entry of `/list_application_content_for_tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaggedContent {
    pub display_name: String,
    pub content_type: String,
    pub thumbnail: Option<String>,
    pub id: String,
    pub tags: Vec<String>,
}

/// Error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidAppId,
    InvalidContentId,
    Cancelled,
    Failed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidAppId => "INVALID_APP_ID",
            ErrorCode::InvalidContentId => "INVALID_CONTENT_ID",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    pub domain: String,
    pub code: ErrorCode,
    #[serde(default)]
    pub detail: Value,
}

/// `{ "status": "error", "error": { domain, code, detail } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorEnvelope {
    pub status: String,
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(code: ErrorCode, detail: Value) -> Self {
        Self {
            status: "error".into(),
            error: ErrorBody {
                domain: ERROR_DOMAIN.into(),
                code,
                detail,
            },
        }
    }
}

/// `{ "status": "ok", "payload": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OkEnvelope<T> {
    pub status: String,
    pub payload: T,
}

impl<T> OkEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            status: "ok".into(),
            payload,
        }
    }
}
