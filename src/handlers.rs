//! HTTP surface. Handlers are thin: they compose store queries or delegate to
//! the feed pipeline and serialize the result.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};

use crate::error::ApiError;
use crate::feed::{FeedAssembler, FeedVariant, FOLLOWS_PREVIEW_LIMIT};
use crate::model::{
    Author, CommentWithAuthor, FeedResponse, MediaPreview, Message, Post, PostId, PostKind,
    Profile, UserId,
};
use crate::store::{AuthorScope, DataStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub feed: FeedAssembler,
}

impl AppState {
    pub fn new(store: Arc<dyn DataStore>, feed_cfg: &crate::config::Feed) -> Self {
        let feed = FeedAssembler::new(store.clone(), feed_cfg);
        Self { store, feed }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/contact/:contact_id/messages", get(contact_messages))
        .route("/api/UserSearch/:username", get(user_search))
        .route("/api/profile/:user_id", get(profile))
        .route("/api/contact/:user_id", get(contacts))
        .route("/api/posts/following/:user_id", get(following_feed))
        .route("/api/posts/popular/:user_id", get(popular_feed))
        .route("/api/feed/:user_id", get(home_feed))
        .route("/api/shorts/:user_id", get(shorts_feed))
        .route("/exploare", get(explore))
        .route("/explore", get(explore))
        .route("/api/friends/:user_id", get(friends))
        .route("/api/comments/:post_id", get(comments))
        .route("/api/hashtag/:tag", get(hashtag))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct ViewerQuery {
    #[serde(rename = "userId")]
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub contact_info: Author,
    pub messages: Vec<Message>,
}

/// Messages between the viewer and a contact. Opening the conversation marks
/// the contact's messages to the viewer as read.
#[instrument(skip(state))]
async fn contact_messages(
    State(state): State<AppState>,
    Path(contact_id): Path<UserId>,
    Query(viewer): Query<ViewerQuery>,
) -> Result<Json<Conversation>, ApiError> {
    let contact_info = state.store.query_author(contact_id).await?;
    let messages = state
        .store
        .query_conversation(viewer.user_id, contact_id)
        .await?;
    if let Err(err) = state.store.mark_read(contact_id, viewer.user_id).await {
        warn!(%err, "failed to mark conversation read");
    }
    Ok(Json(Conversation {
        contact_info,
        messages,
    }))
}

#[instrument(skip(state))]
async fn user_search(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<Author>>, ApiError> {
    let users = state.store.search_authors(&username).await?;
    if users.is_empty() {
        return Err(ApiError::NotFound(format!("user matching '{}'", username)));
    }
    Ok(Json(users))
}

#[derive(Debug, Serialize)]
pub struct ProfilePage {
    pub user: Profile,
    pub follows: Vec<Author>,
    #[serde(rename = "followersCount")]
    pub followers_count: u64,
    #[serde(rename = "followingCount")]
    pub following_count: u64,
    #[serde(rename = "PostsCount")]
    pub posts_count: u64,
    #[serde(rename = "PostImage")]
    pub images: Vec<MediaPreview>,
    #[serde(rename = "PostVideo")]
    pub videos: Vec<MediaPreview>,
    #[serde(rename = "PostRipple")]
    pub notes: Vec<MediaPreview>,
}

fn previews(posts: Vec<Post>) -> Vec<MediaPreview> {
    posts
        .into_iter()
        .map(|p| MediaPreview {
            id: p.id,
            author_id: p.author_id,
            src: p.src,
            text: p.text,
        })
        .collect()
}

/// Reorders authors to follow `ids`; ids without a profile row are dropped.
fn in_edge_order(ids: &[UserId], authors: Vec<Author>) -> Vec<Author> {
    let mut by_id: HashMap<UserId, Author> = authors.into_iter().map(|a| (a.id, a)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[instrument(skip(state))]
async fn profile(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<ProfilePage>, ApiError> {
    let store = &state.store;
    let own = [user_id];
    let (user, preview_edges, all_edges, followers_count, images, videos, notes) = futures::try_join!(
        store.query_profile(user_id),
        store.query_edges(user_id, Some(FOLLOWS_PREVIEW_LIMIT)),
        store.query_edges(user_id, None),
        store.count_followers(user_id),
        store.query_posts(AuthorScope::Only(&own), Some(PostKind::Image)),
        store.query_posts(AuthorScope::Only(&own), Some(PostKind::Video)),
        store.query_posts(AuthorScope::Only(&own), Some(PostKind::Note)),
    )?;

    let preview_ids: Vec<UserId> = preview_edges.iter().map(|e| e.to_id).collect();
    let follows = in_edge_order(&preview_ids, store.query_authors(&preview_ids).await?);
    let posts_count = (images.len() + videos.len() + notes.len()) as u64;

    Ok(Json(ProfilePage {
        user,
        follows,
        followers_count,
        following_count: all_edges.len() as u64,
        posts_count,
        images: previews(images),
        videos: previews(videos),
        notes: previews(notes),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub user_info: Author,
    pub last_message: Option<Message>,
    pub message_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactList {
    pub contacts: Vec<ContactSummary>,
    pub total_messages: u64,
}

/// Most recent conversation first; contacts without messages keep their
/// follow order at the end.
pub fn sort_contacts(contacts: &mut [ContactSummary]) {
    contacts.sort_by(|a, b| {
        let a = a.last_message.as_ref().map(|m| m.created_at);
        let b = b.last_message.as_ref().map(|m| m.created_at);
        b.cmp(&a)
    });
}

async fn contact_summary(
    store: &dyn DataStore,
    viewer: UserId,
    contact: UserId,
) -> Result<Option<ContactSummary>, StoreError> {
    let (last_message, message_count, user_info) = futures::join!(
        store.query_last_message(contact, viewer),
        store.count_unread(contact, viewer),
        store.query_author(contact),
    );
    let user_info = match user_info {
        Ok(author) => author,
        Err(err) if err.is_not_found() => {
            warn!(%contact, "followed user has no profile; leaving out of contacts");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    Ok(Some(ContactSummary {
        user_info,
        last_message: last_message?,
        message_count: message_count?,
    }))
}

#[instrument(skip(state))]
async fn contacts(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<ContactList>, ApiError> {
    let edges = state.store.query_edges(user_id, None).await?;
    let store = state.store.as_ref();
    let summaries = try_join_all(
        edges
            .iter()
            .map(|edge| contact_summary(store, user_id, edge.to_id)),
    )
    .await?;

    let mut contacts: Vec<ContactSummary> = summaries.into_iter().flatten().collect();
    sort_contacts(&mut contacts);
    let total_messages = contacts.iter().map(|c| c.message_count).sum();
    Ok(Json(ContactList {
        contacts,
        total_messages,
    }))
}

#[instrument(skip(state))]
async fn following_feed(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<FeedResponse>, ApiError> {
    let feed = state
        .feed
        .assemble(user_id, FeedVariant::Following, Utc::now())
        .await?;
    Ok(Json(feed))
}

#[instrument(skip(state))]
async fn home_feed(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<FeedResponse>, ApiError> {
    let feed = state
        .feed
        .assemble(user_id, FeedVariant::Home, Utc::now())
        .await?;
    Ok(Json(feed))
}

#[instrument(skip(state))]
async fn shorts_feed(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<FeedResponse>, ApiError> {
    let feed = state
        .feed
        .assemble(user_id, FeedVariant::Shorts, Utc::now())
        .await?;
    Ok(Json(feed))
}

#[instrument(skip(state))]
async fn popular_feed(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<FeedResponse>, ApiError> {
    Ok(Json(state.feed.popular(user_id).await?))
}

/// Image grid across every author.
#[instrument(skip(state))]
async fn explore(State(state): State<AppState>) -> Result<Json<Vec<MediaPreview>>, ApiError> {
    let posts = state
        .store
        .query_posts(AuthorScope::Any, Some(PostKind::Image))
        .await?;
    Ok(Json(previews(posts)))
}

#[derive(Debug, Serialize)]
pub struct Friend {
    #[serde(flatten)]
    pub user: Author,
    pub closed_friend: bool,
}

#[instrument(skip(state))]
async fn friends(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<Friend>>, ApiError> {
    let edges = state.store.query_edges(user_id, None).await?;
    let ids: Vec<UserId> = edges.iter().map(|e| e.to_id).collect();
    let mut by_id: HashMap<UserId, Author> = state
        .store
        .query_authors(&ids)
        .await?
        .into_iter()
        .map(|a| (a.id, a))
        .collect();

    let friends = edges
        .into_iter()
        .filter_map(|edge| {
            by_id.remove(&edge.to_id).map(|user| Friend {
                user,
                closed_friend: edge.close_friend,
            })
        })
        .collect();
    Ok(Json(friends))
}

#[derive(Debug, Serialize)]
pub struct CommentList {
    pub comments: Vec<CommentWithAuthor>,
}

#[instrument(skip(state))]
async fn comments(
    State(state): State<AppState>,
    Path(post_id): Path<PostId>,
) -> Result<Json<CommentList>, ApiError> {
    let comments = state.store.query_comments(post_id).await?;
    let store = state.store.as_ref();
    let comments = join_all(comments.into_iter().map(|comment| async move {
        let user = match store.query_author(comment.author_id).await {
            Ok(author) => Some(author),
            Err(err) => {
                warn!(comment_id = comment.id, %err, "comment author lookup failed");
                None
            }
        };
        CommentWithAuthor { comment, user }
    }))
    .await;
    Ok(Json(CommentList { comments }))
}

#[derive(Debug, Serialize)]
pub struct HashtagPosts {
    pub hashtag: String,
    pub posts: Vec<Post>,
}

#[instrument(skip(state))]
async fn hashtag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<HashtagPosts>, ApiError> {
    let tag = tag.trim_start_matches('#').to_string();
    let posts = state.store.query_posts_by_hashtag(&tag).await?;
    Ok(Json(HashtagPosts { hashtag: tag, posts }))
}
