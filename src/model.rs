use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type PostId = i64;

/// Content type stored in the `type` column of `posts`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    /// Image post; stored as `post` for compatibility with existing rows.
    #[serde(rename = "post")]
    Image,
    Video,
    Note,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Image => "post",
            PostKind::Video => "video",
            PostKind::Note => "note",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "post" | "image" => Some(PostKind::Image),
            "video" => Some(PostKind::Video),
            "note" => Some(PostKind::Note),
            _ => None,
        }
    }
}

/// Public profile summary attached to posts, ads, comments and contacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    #[serde(rename = "uuid")]
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub badge: Option<String>,
    pub image_updated_at: Option<DateTime<Utc>>,
}

/// Full profile row, including the biography shown on the profile page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(flatten)]
    pub author: Author,
    pub bios: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowEdge {
    #[serde(rename = "fromid")]
    pub from_id: UserId,
    #[serde(rename = "toid")]
    pub to_id: UserId,
    #[serde(rename = "closed_friend", default)]
    pub close_friend: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub src: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub kind: PostKind,
    #[serde(rename = "tage")]
    pub tag: Option<String>,
    pub hashtag: Option<String>,
    #[serde(rename = "uuid")]
    pub author_id: UserId,
}

/// A post paired with its precomputed `total_engagement` score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredPost {
    pub post: Post,
    pub total_engagement: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LikeRecord {
    pub id: i64,
    #[serde(rename = "user_id")]
    pub actor_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    #[serde(rename = "comment")]
    pub text: String,
    #[serde(rename = "uuid")]
    pub author_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentWithAuthor {
    #[serde(flatten)]
    pub comment: Comment,
    pub user: Option<Author>,
}

/// Ad row from `ads_random`. Eligible only inside `[start_date, end_date)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SponsoredItem {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub ad_type: Option<String>,
    pub src: Option<String>,
    pub website: Option<String>,
    pub country: Option<String>,
    #[serde(rename = "uuid")]
    pub author_id: UserId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl SponsoredItem {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now < self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "fromid")]
    pub from_id: UserId,
    #[serde(rename = "toid")]
    pub to_id: UserId,
    pub message: String,
    /// Read flag; the column keeps its historical name.
    #[serde(rename = "statue")]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Image post preview used by the explore grid and profile page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaPreview {
    pub id: PostId,
    #[serde(rename = "uuid")]
    pub author_id: UserId,
    pub src: Option<String>,
    pub text: Option<String>,
}

/// Enrichment that fell back to its default for one post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Likes,
    Comments,
    Author,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPost {
    #[serde(flatten)]
    pub post: Post,
    pub user: Option<Author>,
    pub like_count: u64,
    pub viewer_liked: bool,
    pub sample_comment: Option<String>,
    pub comment_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Metric>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredEntry {
    pub id: i64,
    #[serde(rename = "uuid")]
    pub author_id: UserId,
    pub title: String,
    pub content: Option<String>,
    #[serde(rename = "adType")]
    pub ad_type: Option<String>,
    pub src: Option<String>,
    pub website: Option<String>,
    pub user: Author,
}

impl SponsoredEntry {
    pub fn new(item: SponsoredItem, user: Author) -> Self {
        Self {
            id: item.id,
            author_id: item.author_id,
            title: item.title,
            content: item.description,
            ad_type: item.ad_type,
            src: item.src,
            website: item.website,
            user,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedItem {
    Post(EnrichedPost),
    Sponsored(SponsoredEntry),
    Recommended { users: Vec<Author> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FeedResponse {
    #[serde(rename_all = "camelCase")]
    Posts { posts: Vec<FeedItem> },
    #[serde(rename_all = "camelCase")]
    Recommended { recommended_users: Vec<Author> },
}

impl FeedResponse {
    pub fn items(&self) -> &[FeedItem] {
        match self {
            FeedResponse::Posts { posts } => posts,
            FeedResponse::Recommended { .. } => &[],
        }
    }
}
