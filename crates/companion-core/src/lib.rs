//! Core of the companion content server: collaborator contracts, the
//! filesystem content library, byte ranges, content adjusters and federated
//! search.

pub mod adjust;
pub mod fanout;
pub mod fs_library;
pub mod range;
pub mod search;
pub mod source_cache;
pub mod sources;
pub mod uris;

#[cfg(any(test, feature = "test_support"))]
pub mod test_support;

pub use fanout::fan_out;
pub use fs_library::FsContentLibrary;
pub use range::{compute_range, parse_range_header, range_for_header, RangeError, RangeSpec, RequestedRange};
pub use search::{SearchError, SearchOutcome, SearchReconciler, SearchRequest};
pub use source_cache::CachedSourceResolver;
pub use sources::{
    ContentBlob, ContentRecord, ContentStore, LinkTable, LookupError, QueryError, QueryService,
    SourceResolver,
};
pub use uris::UriScope;
