//! Feed assembly pipeline.
//!
//! graph → content → per-post enrichment (fan-out/fan-in) → interleaving.
//! Each stage holds an `Arc<dyn DataStore>` so tests can swap in a fake store.

use thiserror::Error;

use crate::store::StoreError;

pub mod assembler;
pub mod content;
pub mod enrich;
pub mod graph;
pub mod interleave;
pub mod popular;

pub use assembler::{FeedAssembler, FeedVariant};
pub use enrich::Enricher;
pub use interleave::should_insert_at;

/// One sponsored item after every block of this many organic posts.
pub const SPONSORED_EVERY: usize = 4;
/// One recommendation batch after every block of this many organic posts.
pub const RECOMMENDED_EVERY: usize = 2;
pub const RECOMMENDED_LIMIT: usize = 10;
pub const POPULAR_LIMIT: usize = 10;
/// Followed users shown on a profile page.
pub const FOLLOWS_PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An interleave slot could not be filled. Never a 404, even when the
    /// underlying lookup was a missing row.
    #[error("interleave slot failed: {0}")]
    Slot(StoreError),
    #[error("no active sponsored content for interleave slot")]
    NoSponsoredContent,
}
