//! Regional search service.
//!
//! [`RegionalSearch`] fans a [`SearchQuery`](crate::types::SearchQuery) out
//! to every server of the resolved region that serves one of the requested
//! resource types, then deduplicates and ranks what comes back.

mod engine;
pub mod merge;

pub use engine::RegionalSearch;
