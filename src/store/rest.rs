use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderValue, CONTENT_RANGE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::query::{between, Query};
use super::{AuthorScope, DataStore, StoreError, StoreResult};
use crate::model::{
    Author, Comment, FollowEdge, LikeRecord, Message, Post, PostId, PostKind, Profile, ScoredPost,
    SponsoredItem, UserId,
};

const AUTHOR_COLUMNS: &str = "uuid, username, avatar, badge, image_updated_at";
const POST_COLUMNS: &str = "id, src, text, type, tage, hashtag, uuid";
const AD_COLUMNS: &str =
    "id, title, description, ad_type, src, uuid, website, country, start_date, end_date";

/// Hosted relational store reached through its PostgREST endpoint.
#[derive(Clone)]
pub struct RestStore {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for RestStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ScoredRow {
    #[serde(flatten)]
    post: Post,
    #[serde(default)]
    total_engagement: i64,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> StoreResult<Self> {
        // Keep a trailing slash so `join` appends instead of replacing the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|err| StoreError::Url(err.to_string()))?;
        let http = Client::builder()
            .user_agent("ripple-feed/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn build_request(
        &self,
        method: Method,
        query: &Query,
        body: Option<&Value>,
    ) -> StoreResult<reqwest::Request> {
        let url = query.url(&self.base_url)?;
        let mut builder = self
            .http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json");
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .header("Prefer", "return=minimal")
                .json(body);
        }
        Ok(builder.build()?)
    }

    async fn execute(&self, request: reqwest::Request) -> StoreResult<reqwest::Response> {
        debug!(method = %request.method(), url = %request.url(), "store request");
        let res = self.http.execute(request).await?;
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by store: {}", body);
            return Err(StoreError::Status { status: 429, body });
        }
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }
        Ok(res)
    }

    async fn fetch<T: DeserializeOwned>(&self, query: Query) -> StoreResult<Vec<T>> {
        let request = self.build_request(Method::GET, &query, None)?;
        let res = self.execute(request).await?;
        let text = res.text().await?;
        serde_json::from_str(&text).map_err(|err| StoreError::Decode(err.to_string()))
    }

    async fn fetch_one<T: DeserializeOwned>(&self, query: Query, what: String) -> StoreResult<T> {
        self.fetch(query.limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound(what))
    }

    /// HEAD request asking the server for an exact row count, so the total is
    /// not capped by the endpoint's page size.
    pub fn build_count_request(&self, query: Query) -> StoreResult<reqwest::Request> {
        let mut request = self.build_request(Method::HEAD, &query.select("id"), None)?;
        request
            .headers_mut()
            .insert("Prefer", HeaderValue::from_static("count=exact"));
        Ok(request)
    }

    async fn count(&self, query: Query) -> StoreResult<u64> {
        let request = self.build_count_request(query)?;
        let res = self.execute(request).await?;
        let range = res
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| StoreError::Decode("count response without Content-Range".into()))?;
        content_range_total(range)
    }
}

/// Total from a `Content-Range` value such as `0-24/3573` or `*/0`.
fn content_range_total(range: &str) -> StoreResult<u64> {
    range
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
        .ok_or_else(|| StoreError::Decode(format!("unusable Content-Range '{}'", range)))
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl DataStore for RestStore {
    #[instrument(skip_all)]
    async fn query_edges(&self, from: UserId, limit: Option<usize>) -> StoreResult<Vec<FollowEdge>> {
        let mut query = Query::table("follow")
            .select("fromid, toid, closed_friend")
            .eq("fromid", from);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.fetch(query).await
    }

    #[instrument(skip_all)]
    async fn count_followers(&self, user: UserId) -> StoreResult<u64> {
        self.count(Query::table("follow").eq("toid", user)).await
    }

    #[instrument(skip_all)]
    async fn query_posts(
        &self,
        authors: AuthorScope<'_>,
        kind: Option<PostKind>,
    ) -> StoreResult<Vec<Post>> {
        let mut query = Query::table("posts").select(POST_COLUMNS);
        if let AuthorScope::Only(ids) = authors {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            query = query.in_list("uuid", ids);
        }
        if let Some(kind) = kind {
            query = query.eq("type", kind.as_str());
        }
        self.fetch(query.order("id", true)).await
    }

    #[instrument(skip_all)]
    async fn query_scored_posts(&self) -> StoreResult<Vec<ScoredPost>> {
        let rows: Vec<ScoredRow> = self
            .fetch(
                Query::table("posts")
                    .select("id, src, text, type, tage, hashtag, uuid, total_engagement")
                    .order("id", true),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ScoredPost {
                post: row.post,
                total_engagement: row.total_engagement,
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn query_posts_by_hashtag(&self, hashtag: &str) -> StoreResult<Vec<Post>> {
        self.fetch(
            Query::table("posts")
                .select(POST_COLUMNS)
                .eq("hashtag", hashtag)
                .order("id", true),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn query_likes(&self, post: PostId) -> StoreResult<Vec<LikeRecord>> {
        self.fetch(Query::table("like").select("id, user_id").eq("post_id", post))
            .await
    }

    #[instrument(skip_all)]
    async fn query_comments(&self, post: PostId) -> StoreResult<Vec<Comment>> {
        self.fetch(
            Query::table("comments")
                .select("id, comment, uuid")
                .eq("post_id", post)
                .order("id", true),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn query_author(&self, id: UserId) -> StoreResult<Author> {
        self.fetch_one(
            Query::table("users_infos")
                .select(AUTHOR_COLUMNS)
                .eq("uuid", id),
            format!("user {}", id),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn query_authors(&self, ids: &[UserId]) -> StoreResult<Vec<Author>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch(
            Query::table("users_infos")
                .select(AUTHOR_COLUMNS)
                .in_list("uuid", ids),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn query_profile(&self, id: UserId) -> StoreResult<Profile> {
        self.fetch_one(
            Query::table("users_infos")
                .select("uuid, username, avatar, bios, badge, image_updated_at")
                .eq("uuid", id),
            format!("user {}", id),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn search_authors(&self, fragment: &str) -> StoreResult<Vec<Author>> {
        self.fetch(
            Query::table("users_infos")
                .select(AUTHOR_COLUMNS)
                .contains("username", fragment),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn query_sponsored_active(&self, now: DateTime<Utc>) -> StoreResult<Option<SponsoredItem>> {
        let at = timestamp(now);
        let rows: Vec<SponsoredItem> = self
            .fetch(
                Query::table("ads_random")
                    .select(AD_COLUMNS)
                    .lte("start_date", &at)
                    .gt("end_date", &at)
                    .limit(1),
            )
            .await?;
        Ok(rows.into_iter().find(|ad| ad.is_active(now)))
    }

    #[instrument(skip_all)]
    async fn query_recommended(&self, limit: usize) -> StoreResult<Vec<Author>> {
        self.fetch(
            Query::table("users_infos")
                .select(AUTHOR_COLUMNS)
                .order("username", true)
                .limit(limit),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn query_conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
        self.fetch(
            Query::table("message")
                .select("id, fromid, toid, message, statue, created_at")
                .or(between(a, b))
                .order("id", true),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn query_last_message(&self, a: UserId, b: UserId) -> StoreResult<Option<Message>> {
        let rows: Vec<Message> = self
            .fetch(
                Query::table("message")
                    .select("id, fromid, toid, message, statue, created_at")
                    .or(between(a, b))
                    .order("created_at", false)
                    .limit(1),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip_all)]
    async fn count_unread(&self, from: UserId, to: UserId) -> StoreResult<u64> {
        self.count(
            Query::table("message")
                .eq("statue", false)
                .eq("toid", to)
                .eq("fromid", from),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn mark_read(&self, from: UserId, to: UserId) -> StoreResult<()> {
        let query = Query::table("message").eq("fromid", from).eq("toid", to);
        let body = json!({ "statue": true });
        let request = self.build_request(Method::PATCH, &query, Some(&body))?;
        self.execute(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestStore {
        RestStore::new(
            "https://project.example.co",
            "anon-key".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn build_request_sets_headers() {
        let store = store();
        let query = Query::table("posts").select(POST_COLUMNS);
        let request = store.build_request(Method::GET, &query, None).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/posts");
        let headers = request.headers();
        assert_eq!(
            headers.get("apikey").and_then(|h| h.to_str().ok()).unwrap(),
            "anon-key"
        );
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer anon-key"
        );
        assert!(headers.get("Content-Type").is_none());
    }

    #[test]
    fn patch_request_carries_json_body() {
        let store = store();
        let query = Query::table("message").eq("fromid", "a").eq("toid", "b");
        let body = json!({ "statue": true });
        let request = store
            .build_request(Method::PATCH, &query, Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(
            request
                .headers()
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        let sent: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(sent, body);
    }

    #[test]
    fn count_request_asks_for_exact_total() {
        let store = store();
        let request = store
            .build_count_request(Query::table("follow").eq("toid", "u1"))
            .unwrap();
        assert_eq!(request.method(), Method::HEAD);
        assert_eq!(
            request
                .headers()
                .get("Prefer")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "count=exact"
        );
        assert!(request.url().query().unwrap().contains("toid=eq.u1"));
    }

    #[test]
    fn content_range_total_reads_past_page_cap() {
        assert_eq!(content_range_total("0-999/3573").unwrap(), 3573);
        assert_eq!(content_range_total("*/0").unwrap(), 0);
        assert!(content_range_total("0-999/*").is_err());
        assert!(content_range_total("garbage").is_err());
    }

    #[test]
    fn debug_output_hides_key() {
        let rendered = format!("{:?}", store());
        assert!(rendered.contains("project.example.co"));
        assert!(!rendered.contains("anon-key"));
    }

    #[test]
    fn base_url_without_slash_keeps_path() {
        let store = RestStore::new(
            "https://gateway.example.co/supabase",
            "k".into(),
            Duration::from_secs(1),
        )
        .unwrap();
        let request = store
            .build_request(Method::GET, &Query::table("follow"), None)
            .unwrap();
        assert_eq!(request.url().path(), "/supabase/rest/v1/follow");
    }
}
