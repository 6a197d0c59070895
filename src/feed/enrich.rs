use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::model::{Author, EnrichedPost, Metric, Post, UserId};
use crate::store::DataStore;

/// Attaches author summary, like and comment metrics to posts.
///
/// Lookup failures never fail the request: the affected metric falls back to
/// its default (0, `false`, `None`), a warning is logged and the metric is
/// listed in [`EnrichedPost::degraded`]. A missing or failing author lookup is
/// handled the same way for every feed variant.
#[derive(Clone)]
pub struct Enricher {
    store: Arc<dyn DataStore>,
    max_concurrency: usize,
}

impl Enricher {
    pub fn new(store: Arc<dyn DataStore>, max_concurrency: usize) -> Self {
        Self {
            store,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Enrich every post concurrently. Output order matches input order
    /// regardless of which lookups finish first.
    #[instrument(skip_all, fields(posts = posts.len()))]
    pub async fn enrich_all(&self, posts: Vec<Post>, viewer: UserId) -> Vec<EnrichedPost> {
        stream::iter(posts)
            .map(|post| self.enrich_one(post, viewer))
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    pub async fn enrich_one(&self, post: Post, viewer: UserId) -> EnrichedPost {
        let (likes, comments, author) = futures::join!(
            self.store.query_likes(post.id),
            self.store.query_comments(post.id),
            self.store.query_author(post.author_id),
        );

        let mut degraded = Vec::new();

        let (like_count, viewer_liked) = match likes {
            Ok(likes) => (
                likes.len() as u64,
                likes.iter().any(|like| like.actor_id == viewer),
            ),
            Err(err) => {
                warn!(post_id = post.id, %err, "like lookup failed; using defaults");
                degraded.push(Metric::Likes);
                (0, false)
            }
        };

        let (comment_count, sample_comment) = match comments {
            Ok(comments) => {
                let sample = comments.first().map(|c| c.text.clone());
                (comments.len() as u64, sample)
            }
            Err(err) => {
                warn!(post_id = post.id, %err, "comment lookup failed; using defaults");
                degraded.push(Metric::Comments);
                (0, None)
            }
        };

        let user: Option<Author> = match author {
            Ok(author) => Some(author),
            Err(err) => {
                warn!(post_id = post.id, author = %post.author_id, %err, "author lookup failed");
                degraded.push(Metric::Author);
                None
            }
        };

        EnrichedPost {
            post,
            user,
            like_count,
            viewer_liked,
            sample_comment,
            comment_count,
            degraded,
        }
    }
}
