use std::sync::Arc;
use tracing::instrument;

use crate::model::{Post, PostKind, UserId};
use crate::store::{AuthorScope, DataStore, StoreResult};

/// Fetches candidate posts for a feed.
#[derive(Clone)]
pub struct ContentFetcher {
    store: Arc<dyn DataStore>,
}

impl ContentFetcher {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// `authors: None` means any author. An empty author list returns no posts
    /// without touching the store.
    #[instrument(skip(self, authors), fields(authors = authors.map(|a| a.len())))]
    pub async fn fetch(
        &self,
        authors: Option<&[UserId]>,
        kind: Option<PostKind>,
    ) -> StoreResult<Vec<Post>> {
        let scope = match authors {
            Some([]) => return Ok(Vec::new()),
            Some(ids) => AuthorScope::Only(ids),
            None => AuthorScope::Any,
        };
        self.store.query_posts(scope, kind).await
    }
}
