use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{instrument, warn};

use super::{FeedError, RECOMMENDED_LIMIT};
use crate::config::SlotPolicy;
use crate::model::{Author, SponsoredEntry};
use crate::store::DataStore;

/// True when a slot follows the organic item at `index`: the 1-based position
/// closes a block of `every` items and the item is not the last one.
pub fn should_insert_at(index: usize, len: usize, every: usize) -> bool {
    every > 0 && (index + 1) % every == 0 && index + 1 < len
}

/// Picks the sponsored item shown in a slot.
#[derive(Clone)]
pub struct SponsoredInterleaver {
    store: Arc<dyn DataStore>,
    policy: SlotPolicy,
}

impl SponsoredInterleaver {
    pub fn new(store: Arc<dyn DataStore>, policy: SlotPolicy) -> Self {
        Self { store, policy }
    }

    /// `Ok(None)` means the slot is left out under [`SlotPolicy::Skip`].
    #[instrument(skip(self))]
    pub async fn select_one(&self, now: DateTime<Utc>) -> Result<Option<SponsoredEntry>, FeedError> {
        let candidate = match self.store.query_sponsored_active(now).await {
            Ok(candidate) => candidate,
            Err(err) => return self.give_up(FeedError::Slot(err)),
        };
        // The store filters by window too; re-check so a stale row never leaks through.
        let Some(item) = candidate.filter(|ad| ad.is_active(now)) else {
            return self.give_up(FeedError::NoSponsoredContent);
        };
        let author = match self.store.query_author(item.author_id).await {
            Ok(author) => author,
            Err(err) => return self.give_up(FeedError::Slot(err)),
        };
        Ok(Some(SponsoredEntry::new(item, author)))
    }

    fn give_up<T>(&self, err: FeedError) -> Result<Option<T>, FeedError> {
        match self.policy {
            SlotPolicy::Skip => {
                warn!(%err, "skipping sponsored slot");
                Ok(None)
            }
            SlotPolicy::Fail => Err(err),
        }
    }
}

/// Supplies batches of recommended accounts, independent of the viewer's graph.
#[derive(Clone)]
pub struct Recommender {
    store: Arc<dyn DataStore>,
    policy: SlotPolicy,
}

impl Recommender {
    pub fn new(store: Arc<dyn DataStore>, policy: SlotPolicy) -> Self {
        Self { store, policy }
    }

    /// Up to `RECOMMENDED_LIMIT` accounts. Errors always propagate.
    #[instrument(skip(self))]
    pub async fn fetch_batch(&self) -> Result<Vec<Author>, FeedError> {
        let mut users = self.store.query_recommended(RECOMMENDED_LIMIT).await?;
        users.truncate(RECOMMENDED_LIMIT);
        Ok(users)
    }

    /// Batch for an interleave slot. Empty batches are never emitted; fetch
    /// errors follow the slot policy.
    pub async fn slot(&self) -> Result<Option<Vec<Author>>, FeedError> {
        let batch = match self.fetch_batch().await {
            Err(FeedError::Store(err)) => Err(FeedError::Slot(err)),
            other => other,
        };
        match batch {
            Ok(users) if users.is_empty() => Ok(None),
            Ok(users) => Ok(Some(users)),
            Err(err) => match self.policy {
                SlotPolicy::Skip => {
                    warn!(%err, "skipping recommendation slot");
                    Ok(None)
                }
                SlotPolicy::Fail => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{RECOMMENDED_EVERY, SPONSORED_EVERY};

    fn slots(len: usize, every: usize) -> Vec<usize> {
        (0..len).filter(|&i| should_insert_at(i, len, every)).collect()
    }

    #[test]
    fn sponsored_slots_follow_every_fourth_post() {
        assert_eq!(slots(9, SPONSORED_EVERY), vec![3, 7]);
        assert_eq!(slots(5, SPONSORED_EVERY), vec![3]);
    }

    #[test]
    fn never_inserts_after_last_item() {
        assert!(slots(4, SPONSORED_EVERY).is_empty());
        assert_eq!(slots(8, SPONSORED_EVERY), vec![3]);
        assert!(slots(2, RECOMMENDED_EVERY).is_empty());
        assert!(slots(0, SPONSORED_EVERY).is_empty());
        assert!(slots(1, RECOMMENDED_EVERY).is_empty());
    }

    #[test]
    fn slot_count_matches_block_formula() {
        for len in 1..40usize {
            assert_eq!(slots(len, SPONSORED_EVERY).len(), (len - 1) / SPONSORED_EVERY);
            assert_eq!(slots(len, RECOMMENDED_EVERY).len(), (len - 1) / RECOMMENDED_EVERY);
        }
    }

    #[test]
    fn zero_cadence_never_fires() {
        assert!(slots(10, 0).is_empty());
    }
}
