use std::sync::Arc;
use tracing::{debug, instrument};

use crate::model::UserId;
use crate::store::{DataStore, StoreResult};

/// Resolves the authors a viewer follows.
#[derive(Clone)]
pub struct SocialGraph {
    store: Arc<dyn DataStore>,
}

impl SocialGraph {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Followed author ids in edge order, with `viewer` appended when
    /// `include_viewer` is set and the viewer does not already follow itself.
    /// An empty result is valid.
    #[instrument(skip(self))]
    pub async fn followed_ids(&self, viewer: UserId, include_viewer: bool) -> StoreResult<Vec<UserId>> {
        let mut ids: Vec<UserId> = self
            .store
            .query_edges(viewer, None)
            .await?
            .into_iter()
            .map(|edge| edge.to_id)
            .collect();
        if include_viewer && !ids.contains(&viewer) {
            ids.push(viewer);
        }
        debug!(count = ids.len(), "resolved followed authors");
        Ok(ids)
    }
}
