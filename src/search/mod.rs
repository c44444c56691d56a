//! Search Index
//!
//! Builds structured tag queries for the secondary index and decodes the
//! store's positional search replies into typed rows.

pub mod query;
pub mod reply;

pub use query::{escape_tag_value, SearchQuery, TagField, TagPredicate};
pub use reply::{SearchReply, SearchRow, DOCUMENT_FIELD};
