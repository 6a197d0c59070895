use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

use super::content::ContentFetcher;
use super::enrich::Enricher;
use super::graph::SocialGraph;
use super::interleave::{should_insert_at, Recommender, SponsoredInterleaver};
use super::popular::rank_by_engagement;
use super::{FeedError, POPULAR_LIMIT, RECOMMENDED_EVERY, SPONSORED_EVERY};
use crate::config;
use crate::model::{FeedItem, FeedResponse, PostKind, UserId};
use crate::store::DataStore;

/// Entry points that share the pipeline with different inputs and cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedVariant {
    /// Posts by followed authors, sponsored slots only.
    Following,
    /// Followed authors plus the viewer, recommendation and sponsored slots,
    /// recommendations-only when there are no posts.
    Home,
    /// Videos from every author, sponsored slots only.
    Shorts,
}

#[derive(Debug, Clone, Copy)]
struct Options {
    followed_only: bool,
    include_viewer: bool,
    kind: Option<PostKind>,
    recommendations: bool,
}

impl FeedVariant {
    fn options(self) -> Options {
        match self {
            FeedVariant::Following => Options {
                followed_only: true,
                include_viewer: false,
                kind: None,
                recommendations: false,
            },
            FeedVariant::Home => Options {
                followed_only: true,
                include_viewer: true,
                kind: None,
                recommendations: true,
            },
            FeedVariant::Shorts => Options {
                followed_only: false,
                include_viewer: false,
                kind: Some(PostKind::Video),
                recommendations: false,
            },
        }
    }
}

#[derive(Clone)]
pub struct FeedAssembler {
    graph: SocialGraph,
    content: ContentFetcher,
    enricher: Enricher,
    sponsored: SponsoredInterleaver,
    recommender: Recommender,
    store: Arc<dyn DataStore>,
}

impl FeedAssembler {
    pub fn new(store: Arc<dyn DataStore>, cfg: &config::Feed) -> Self {
        Self {
            graph: SocialGraph::new(store.clone()),
            content: ContentFetcher::new(store.clone()),
            enricher: Enricher::new(store.clone(), cfg.max_concurrency),
            sponsored: SponsoredInterleaver::new(store.clone(), cfg.slot_policy),
            recommender: Recommender::new(store.clone(), cfg.slot_policy),
            store,
        }
    }

    #[instrument(skip(self, now))]
    pub async fn assemble(
        &self,
        viewer: UserId,
        variant: FeedVariant,
        now: DateTime<Utc>,
    ) -> Result<FeedResponse, FeedError> {
        let opts = variant.options();

        let authors = if opts.followed_only {
            Some(self.graph.followed_ids(viewer, opts.include_viewer).await?)
        } else {
            None
        };
        let candidates = self.content.fetch(authors.as_deref(), opts.kind).await?;

        if candidates.is_empty() && opts.recommendations {
            let recommended_users = self.recommender.fetch_batch().await?;
            info!(count = recommended_users.len(), "no posts; returning recommendations");
            return Ok(FeedResponse::Recommended { recommended_users });
        }

        let enriched = self.enricher.enrich_all(candidates, viewer).await;
        let len = enriched.len();
        let mut posts = Vec::with_capacity(len + len / RECOMMENDED_EVERY + 1);
        for (i, post) in enriched.into_iter().enumerate() {
            posts.push(FeedItem::Post(post));
            if opts.recommendations && should_insert_at(i, len, RECOMMENDED_EVERY) {
                if let Some(users) = self.recommender.slot().await? {
                    posts.push(FeedItem::Recommended { users });
                }
            }
            if should_insert_at(i, len, SPONSORED_EVERY) {
                if let Some(entry) = self.sponsored.select_one(now).await? {
                    posts.push(FeedItem::Sponsored(entry));
                }
            }
        }
        Ok(FeedResponse::Posts { posts })
    }

    /// Top posts across all authors by precomputed engagement. No slots.
    #[instrument(skip(self))]
    pub async fn popular(&self, viewer: UserId) -> Result<FeedResponse, FeedError> {
        let scored = self.store.query_scored_posts().await?;
        let top = rank_by_engagement(scored, POPULAR_LIMIT);
        let posts = self
            .enricher
            .enrich_all(top, viewer)
            .await
            .into_iter()
            .map(FeedItem::Post)
            .collect();
        Ok(FeedResponse::Posts { posts })
    }
}
