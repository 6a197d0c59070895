use crate::model::{Post, ScoredPost};

/// Highest `total_engagement` first, at most `limit` posts. The sort is stable,
/// so equal scores keep the order the store returned them in.
pub fn rank_by_engagement(mut scored: Vec<ScoredPost>, limit: usize) -> Vec<Post> {
    scored.sort_by(|a, b| b.total_engagement.cmp(&a.total_engagement));
    scored.into_iter().take(limit).map(|s| s.post).collect()
}
