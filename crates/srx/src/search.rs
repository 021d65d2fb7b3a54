//! 🔎 The read side: turning a query string and an actor into pages, counts and snippets.
//!
//! 🎬 *[the indexer spent all night filling the index. now someone wants to find something.]*
//!
//! - [`query`]: the typed [`Filter`] and the request/response shapes.
//! - [`visibility`]: who may see what, as filters.
//! - [`scope`]: the nine result tabs.
//! - [`results`]: the per-request aggregator.
//! - [`blob`]: code snippets out of file hits.
//! - [`highlight`]: backend markers to safe HTML.
//! - [`pagination`]: pages that know their neighbours.

pub mod blob;
pub mod highlight;
pub mod pagination;
pub mod query;
pub mod results;
pub mod scope;
pub mod visibility;

pub use blob::{FoundBlob, basename, parse_search_result};
pub use highlight::{HIGHLIGHT_END_TAG, HIGHLIGHT_START_TAG, Highlighted};
pub use pagination::{MAX_PER_PAGE, PageRequest, PaginatedCollection};
pub use query::{Filter, HighlightSpec, SearchHit, SearchRequest, SearchResponse, Sort, SortOrder};
pub use results::{MAX_RESULT_WINDOW, SearchDocument, SearchFilters, SearchObject, SearchResults};
pub use scope::Scope;
pub use visibility::{AccessLevel, AccessPolicy, InMemoryAccessPolicy, ProjectScope, SearchActor, Visibility};
