//! Data store seam: every handler and pipeline stage talks to the relational
//! backend through [`DataStore`].
//!
//! - `query`: PostgREST-style query builder used by the hosted backend.
//! - `rest`: [`RestStore`], the hosted store reached over HTTP.
//! - `sqlite`: [`SqliteStore`], a local sqlx-backed store with the same schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config;
use crate::model::{
    Author, Comment, FollowEdge, LikeRecord, Message, Post, PostId, PostKind, Profile, ScoredPost,
    SponsoredItem, UserId,
};

pub mod query;
pub mod rest;
pub mod sqlite;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("invalid store url: {0}")]
    Url(String),
    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which authors a post query is restricted to.
#[derive(Debug, Clone, Copy)]
pub enum AuthorScope<'a> {
    Any,
    Only(&'a [UserId]),
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Outgoing follow edges of `from`, at most `limit` when given.
    async fn query_edges(&self, from: UserId, limit: Option<usize>) -> StoreResult<Vec<FollowEdge>>;

    async fn count_followers(&self, user: UserId) -> StoreResult<u64>;

    /// Posts in fetch order. `AuthorScope::Only(&[])` yields no rows.
    async fn query_posts(
        &self,
        authors: AuthorScope<'_>,
        kind: Option<PostKind>,
    ) -> StoreResult<Vec<Post>>;

    async fn query_scored_posts(&self) -> StoreResult<Vec<ScoredPost>>;

    async fn query_posts_by_hashtag(&self, hashtag: &str) -> StoreResult<Vec<Post>>;

    async fn query_likes(&self, post: PostId) -> StoreResult<Vec<LikeRecord>>;

    async fn query_comments(&self, post: PostId) -> StoreResult<Vec<Comment>>;

    /// Single author summary; `StoreError::NotFound` when the row is missing.
    async fn query_author(&self, id: UserId) -> StoreResult<Author>;

    async fn query_authors(&self, ids: &[UserId]) -> StoreResult<Vec<Author>>;

    async fn query_profile(&self, id: UserId) -> StoreResult<Profile>;

    async fn search_authors(&self, fragment: &str) -> StoreResult<Vec<Author>>;

    /// One ad whose window contains `now`, if any.
    async fn query_sponsored_active(&self, now: DateTime<Utc>) -> StoreResult<Option<SponsoredItem>>;

    async fn query_recommended(&self, limit: usize) -> StoreResult<Vec<Author>>;

    /// Messages exchanged between `a` and `b` in either direction, oldest id first.
    async fn query_conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>>;

    async fn query_last_message(&self, a: UserId, b: UserId) -> StoreResult<Option<Message>>;

    async fn count_unread(&self, from: UserId, to: UserId) -> StoreResult<u64>;

    /// Marks every message sent by `from` to `to` as read.
    async fn mark_read(&self, from: UserId, to: UserId) -> StoreResult<()>;
}

/// Build the configured backend. For sqlite, `DATABASE_URL` takes precedence
/// over the configured URL and migrations are applied on connect.
pub async fn connect(cfg: &config::Store) -> StoreResult<Arc<dyn DataStore>> {
    match cfg {
        config::Store::Rest {
            url,
            api_key,
            timeout_seconds,
        } => {
            info!(%url, "using hosted store");
            let store = RestStore::new(url, api_key.clone(), Duration::from_secs(*timeout_seconds))?;
            Ok(Arc::new(store))
        }
        config::Store::Sqlite { database_url } => {
            let database_url =
                std::env::var("DATABASE_URL").unwrap_or_else(|_| database_url.clone());
            info!(%database_url, "using sqlite store");
            let store = SqliteStore::connect(&database_url).await?;
            Ok(Arc::new(store))
        }
    }
}
