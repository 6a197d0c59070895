use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use super::{AuthorScope, DataStore, StoreError, StoreResult};
use crate::model::{
    Author, Comment, FollowEdge, LikeRecord, Message, Post, PostId, PostKind, Profile, ScoredPost,
    SponsoredItem, UserId,
};

pub type Pool = SqlitePool;

const AUTHOR_SELECT: &str =
    "SELECT uuid, username, avatar, badge, image_updated_at FROM users_infos";
const POST_SELECT: &str =
    "SELECT id, src, text, type, tage, hashtag, uuid, total_engagement FROM posts";
const MESSAGE_SELECT: &str =
    "SELECT id, fromid, toid, message, statue, created_at FROM message \
     WHERE (fromid = ? AND toid = ?) OR (fromid = ? AND toid = ?)";

/// Local relational store with the same tables as the hosted backend.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Connect and apply the embedded migrations.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

pub async fn init_pool(database_url: &str) -> StoreResult<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> StoreResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| StoreError::Sql(err.into()))?;
    Ok(())
}

/// Expand a leading `~/` in file-backed URLs, create the parent directory and
/// add `mode=rwc` so a fresh database file is created. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let expanded = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query {
        None | Some("") => "mode=rwc".to_string(),
        Some(q) if q.split('&').any(|pair| pair.starts_with("mode=")) => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
    };
    format!("sqlite://{}?{}", expanded, query)
}

fn uuid_col(row: &SqliteRow, col: &str) -> StoreResult<Uuid> {
    let raw: String = row.try_get(col)?;
    Uuid::parse_str(&raw).map_err(|err| StoreError::Decode(format!("{}: {}", col, err)))
}

fn author_from_row(row: &SqliteRow) -> StoreResult<Author> {
    Ok(Author {
        id: uuid_col(row, "uuid")?,
        username: row.try_get("username")?,
        avatar: row.try_get("avatar")?,
        badge: row.try_get("badge")?,
        image_updated_at: row.try_get("image_updated_at")?,
    })
}

fn post_from_row(row: &SqliteRow) -> StoreResult<Post> {
    let kind: String = row.try_get("type")?;
    Ok(Post {
        id: row.try_get("id")?,
        src: row.try_get("src")?,
        text: row.try_get("text")?,
        kind: PostKind::parse_kind(&kind)
            .ok_or_else(|| StoreError::Decode(format!("unknown post type {}", kind)))?,
        tag: row.try_get("tage")?,
        hashtag: row.try_get("hashtag")?,
        author_id: uuid_col(row, "uuid")?,
    })
}

fn message_from_row(row: &SqliteRow) -> StoreResult<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        from_id: uuid_col(row, "fromid")?,
        to_id: uuid_col(row, "toid")?,
        message: row.try_get("message")?,
        read: row.try_get("statue")?,
        created_at: row.try_get("created_at")?,
    })
}

fn sponsored_from_row(row: &SqliteRow) -> StoreResult<SponsoredItem> {
    Ok(SponsoredItem {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        ad_type: row.try_get("ad_type")?,
        src: row.try_get("src")?,
        website: row.try_get("website")?,
        country: row.try_get("country")?,
        author_id: uuid_col(row, "uuid")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
    })
}

fn collect<T>(
    rows: Vec<SqliteRow>,
    map: fn(&SqliteRow) -> StoreResult<T>,
) -> StoreResult<Vec<T>> {
    rows.iter().map(map).collect()
}

#[async_trait]
impl DataStore for SqliteStore {
    #[instrument(skip_all)]
    async fn query_edges(&self, from: UserId, limit: Option<usize>) -> StoreResult<Vec<FollowEdge>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT fromid, toid, closed_friend FROM follow WHERE fromid = ? ORDER BY id LIMIT ?",
        )
        .bind(from.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(FollowEdge {
                    from_id: uuid_col(row, "fromid")?,
                    to_id: uuid_col(row, "toid")?,
                    close_friend: row.try_get("closed_friend")?,
                })
            })
            .collect()
    }

    #[instrument(skip_all)]
    async fn count_followers(&self, user: UserId) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follow WHERE toid = ?")
            .bind(user.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    #[instrument(skip_all)]
    async fn query_posts(
        &self,
        authors: AuthorScope<'_>,
        kind: Option<PostKind>,
    ) -> StoreResult<Vec<Post>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(POST_SELECT);
        qb.push(" WHERE 1 = 1");
        if let AuthorScope::Only(ids) = authors {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND uuid IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");
        }
        if let Some(kind) = kind {
            qb.push(" AND type = ").push_bind(kind.as_str());
        }
        qb.push(" ORDER BY id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        collect(rows, post_from_row)
    }

    #[instrument(skip_all)]
    async fn query_scored_posts(&self) -> StoreResult<Vec<ScoredPost>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", POST_SELECT))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ScoredPost {
                    post: post_from_row(row)?,
                    total_engagement: row.try_get("total_engagement")?,
                })
            })
            .collect()
    }

    #[instrument(skip_all)]
    async fn query_posts_by_hashtag(&self, hashtag: &str) -> StoreResult<Vec<Post>> {
        let rows = sqlx::query(&format!("{} WHERE hashtag = ? ORDER BY id", POST_SELECT))
            .bind(hashtag)
            .fetch_all(&self.pool)
            .await?;
        collect(rows, post_from_row)
    }

    #[instrument(skip_all)]
    async fn query_likes(&self, post: PostId) -> StoreResult<Vec<LikeRecord>> {
        let rows = sqlx::query(r#"SELECT id, user_id FROM "like" WHERE post_id = ? ORDER BY id"#)
            .bind(post)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(LikeRecord {
                    id: row.try_get("id")?,
                    actor_id: uuid_col(row, "user_id")?,
                })
            })
            .collect()
    }

    #[instrument(skip_all)]
    async fn query_comments(&self, post: PostId) -> StoreResult<Vec<Comment>> {
        let rows =
            sqlx::query("SELECT id, comment, uuid FROM comments WHERE post_id = ? ORDER BY id")
                .bind(post)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                Ok(Comment {
                    id: row.try_get("id")?,
                    text: row.try_get("comment")?,
                    author_id: uuid_col(row, "uuid")?,
                })
            })
            .collect()
    }

    #[instrument(skip_all)]
    async fn query_author(&self, id: UserId) -> StoreResult<Author> {
        let row = sqlx::query(&format!("{} WHERE uuid = ?", AUTHOR_SELECT))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => author_from_row(&row),
            None => Err(StoreError::NotFound(format!("user {}", id))),
        }
    }

    #[instrument(skip_all)]
    async fn query_authors(&self, ids: &[UserId]) -> StoreResult<Vec<Author>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(AUTHOR_SELECT);
        qb.push(" WHERE uuid IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");
        let rows = qb.build().fetch_all(&self.pool).await?;
        collect(rows, author_from_row)
    }

    #[instrument(skip_all)]
    async fn query_profile(&self, id: UserId) -> StoreResult<Profile> {
        let row = sqlx::query(
            "SELECT uuid, username, avatar, bios, badge, image_updated_at FROM users_infos WHERE uuid = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(format!("user {}", id)));
        };
        Ok(Profile {
            author: author_from_row(&row)?,
            bios: row.try_get("bios")?,
        })
    }

    #[instrument(skip_all)]
    async fn search_authors(&self, fragment: &str) -> StoreResult<Vec<Author>> {
        let rows = sqlx::query(&format!(
            "{} WHERE username LIKE '%' || ? || '%' ORDER BY username",
            AUTHOR_SELECT
        ))
        .bind(fragment)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, author_from_row)
    }

    #[instrument(skip_all)]
    async fn query_sponsored_active(&self, now: DateTime<Utc>) -> StoreResult<Option<SponsoredItem>> {
        let rows = sqlx::query(
            "SELECT id, title, description, ad_type, src, uuid, website, country, start_date, end_date \
             FROM ads_random ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            let ad = sponsored_from_row(row)?;
            if ad.is_active(now) {
                return Ok(Some(ad));
            }
        }
        Ok(None)
    }

    #[instrument(skip_all)]
    async fn query_recommended(&self, limit: usize) -> StoreResult<Vec<Author>> {
        let rows = sqlx::query(&format!("{} ORDER BY username LIMIT ?", AUTHOR_SELECT))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        collect(rows, author_from_row)
    }

    #[instrument(skip_all)]
    async fn query_conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(&format!("{} ORDER BY id ASC", MESSAGE_SELECT))
            .bind(a.to_string())
            .bind(b.to_string())
            .bind(b.to_string())
            .bind(a.to_string())
            .fetch_all(&self.pool)
            .await?;
        collect(rows, message_from_row)
    }

    #[instrument(skip_all)]
    async fn query_last_message(&self, a: UserId, b: UserId) -> StoreResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "{} ORDER BY created_at DESC, id DESC LIMIT 1",
            MESSAGE_SELECT
        ))
        .bind(a.to_string())
        .bind(b.to_string())
        .bind(b.to_string())
        .bind(a.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    #[instrument(skip_all)]
    async fn count_unread(&self, from: UserId, to: UserId) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM message WHERE statue = 0 AND toid = ? AND fromid = ?",
        )
        .bind(to.to_string())
        .bind(from.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }

    #[instrument(skip_all)]
    async fn mark_read(&self, from: UserId, to: UserId) -> StoreResult<()> {
        sqlx::query("UPDATE message SET statue = 1 WHERE fromid = ? AND toid = ?")
            .bind(from.to_string())
            .bind(to.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
