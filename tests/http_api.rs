use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ripple_feed::config;
use ripple_feed::handlers::{router, AppState};
use ripple_feed::model::UserId;
use ripple_feed::store::{DataStore, SqliteStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn app(pool: &sqlx::SqlitePool) -> Router {
    let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    app_with_feed(pool, &cfg.feed)
}

fn app_with_feed(pool: &sqlx::SqlitePool, feed: &config::Feed) -> Router {
    let store: Arc<dyn DataStore> = Arc::new(SqliteStore::new(pool.clone()));
    router(AppState::new(store, feed))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        json!(null)
    } else {
        serde_json::from_slice(&bytes).unwrap_or(json!(null))
    };
    (status, json)
}

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
}

async fn add_user(pool: &sqlx::SqlitePool, name: &str) -> UserId {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users_infos (uuid, username, bios) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(format!("{} bio", name))
        .execute(pool)
        .await
        .unwrap();
    id
}

async fn follow(pool: &sqlx::SqlitePool, from: UserId, to: UserId, close: bool) {
    sqlx::query("INSERT INTO follow (fromid, toid, closed_friend) VALUES (?, ?, ?)")
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(close)
        .execute(pool)
        .await
        .unwrap();
}

async fn add_post(pool: &sqlx::SqlitePool, author: UserId, kind: &str, hashtag: Option<&str>) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO posts (src, text, type, hashtag, uuid) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(format!("https://cdn.example/{}.bin", kind))
    .bind("caption")
    .bind(kind)
    .bind(hashtag)
    .bind(author.to_string())
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn send(pool: &sqlx::SqlitePool, from: UserId, to: UserId, text: &str, minute: i64) {
    sqlx::query("INSERT INTO message (fromid, toid, message, created_at) VALUES (?, ?, ?, ?)")
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(text)
        .bind(at(minute))
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn health_reports_ok() {
    let pool = setup_pool().await;
    let (status, body) = get(&app(&pool), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn unknown_profile_is_not_found() {
    let pool = setup_pool().await;
    let (status, body) = get(&app(&pool), &format!("/api/profile/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn profile_page_counts_and_groups_posts() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    let mut followed = Vec::new();
    for i in 0..7 {
        let u = add_user(&pool, &format!("friend{}", i)).await;
        follow(&pool, me, u, false).await;
        followed.push(u);
    }
    follow(&pool, followed[0], me, false).await;
    follow(&pool, followed[1], me, false).await;
    add_post(&pool, me, "post", None).await;
    add_post(&pool, me, "post", None).await;
    add_post(&pool, me, "video", None).await;
    add_post(&pool, me, "note", None).await;
    add_post(&pool, followed[0], "post", None).await;

    let (status, body) = get(&app(&pool), &format!("/api/profile/{}", me)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "me");
    assert_eq!(body["user"]["bios"], "me bio");
    let follows: Vec<String> = body["follows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["uuid"].as_str().unwrap().to_string())
        .collect();
    let first_five: Vec<String> = followed.iter().take(5).map(|u| u.to_string()).collect();
    assert_eq!(follows, first_five);
    assert_eq!(body["followersCount"], 2);
    assert_eq!(body["followingCount"], 7);
    assert_eq!(body["PostsCount"], 4);
    assert_eq!(body["PostImage"].as_array().unwrap().len(), 2);
    assert_eq!(body["PostVideo"].as_array().unwrap().len(), 1);
    assert_eq!(body["PostRipple"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn user_search_matches_fragment() {
    let pool = setup_pool().await;
    add_user(&pool, "marina").await;
    add_user(&pool, "mario").await;
    add_user(&pool, "zoe").await;
    let app = app(&pool);

    let (status, body) = get(&app, "/api/UserSearch/mar").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["marina", "mario"]);

    let (status, _) = get(&app, "/api/UserSearch/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn contacts_sorted_by_latest_message_with_unread_totals() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    let ann = add_user(&pool, "ann").await;
    let ben = add_user(&pool, "ben").await;
    let cat = add_user(&pool, "cat").await;
    follow(&pool, me, ann, false).await;
    follow(&pool, me, ben, false).await;
    follow(&pool, me, cat, false).await;

    send(&pool, ann, me, "hey", 1).await;
    send(&pool, me, ann, "hi", 2).await;
    send(&pool, ben, me, "lunch?", 5).await;
    send(&pool, ben, me, "hello?", 6).await;

    let (status, body) = get(&app(&pool), &format!("/api/contact/{}", me)).await;
    assert_eq!(status, StatusCode::OK);
    let contacts = body["contacts"].as_array().unwrap();
    let names: Vec<&str> = contacts
        .iter()
        .map(|c| c["userInfo"]["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["ben", "ann", "cat"]);
    assert_eq!(contacts[0]["messageCount"], 2);
    assert_eq!(contacts[0]["lastMessage"]["message"], "hello?");
    assert_eq!(contacts[1]["messageCount"], 1);
    assert_eq!(contacts[1]["lastMessage"]["message"], "hi");
    assert_eq!(contacts[2]["lastMessage"], Value::Null);
    assert_eq!(body["totalMessages"], 3);
}

#[tokio::test]
async fn opening_a_conversation_marks_it_read() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    let ann = add_user(&pool, "ann").await;
    follow(&pool, me, ann, false).await;
    send(&pool, ann, me, "one", 1).await;
    send(&pool, me, ann, "two", 2).await;
    send(&pool, ann, me, "three", 3).await;
    let app = app(&pool);

    let (status, body) = get(&app, &format!("/contact/{}/messages?userId={}", ann, me)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contactInfo"]["username"], "ann");
    let texts: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["one", "two", "three"]);

    let (_, contacts) = get(&app, &format!("/api/contact/{}", me)).await;
    assert_eq!(contacts["totalMessages"], 0);

    // Only the contact's messages to the viewer are marked.
    let unread_outgoing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM message WHERE statue = 0 AND fromid = ?")
            .bind(me.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(unread_outgoing, 1);
}

#[tokio::test]
async fn conversation_with_unknown_contact_is_not_found() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    let (status, _) = get(
        &app(&pool),
        &format!("/contact/{}/messages?userId={}", Uuid::new_v4(), me),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn home_feed_serializes_enriched_posts() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    let ann = add_user(&pool, "ann").await;
    follow(&pool, me, ann, false).await;
    add_post(&pool, ann, "post", None).await;

    let (status, body) = get(&app(&pool), &format!("/api/feed/{}", me)).await;
    assert_eq!(status, StatusCode::OK);
    let post = &body["posts"][0];
    assert_eq!(post["kind"], "post");
    assert_eq!(post["type"], "post");
    assert_eq!(post["user"]["username"], "ann");
    assert_eq!(post["likeCount"], 0);
    assert_eq!(post["viewerLiked"], false);
    assert_eq!(post["commentCount"], 0);
    assert_eq!(post["sampleComment"], Value::Null);
}

#[tokio::test]
async fn home_feed_without_content_recommends_users() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    add_user(&pool, "ann").await;

    let (status, body) = get(&app(&pool), &format!("/api/feed/{}", me)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommendedUsers"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn sponsored_slot_failure_is_a_server_error() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    let ann = add_user(&pool, "ann").await;
    follow(&pool, me, ann, false).await;
    for _ in 0..5 {
        add_post(&pool, ann, "post", None).await;
    }
    // The sponsor has no profile row, so the slot's author lookup finds nothing.
    sqlx::query(
        "INSERT INTO ads_random (title, uuid, start_date, end_date) VALUES (?, ?, ?, ?)",
    )
    .bind("Orphan ad")
    .bind(Uuid::new_v4().to_string())
    .bind(Utc::now() - Duration::days(1))
    .bind(Utc::now() + Duration::days(1))
    .execute(&pool)
    .await
    .unwrap();

    let strict = config::Feed {
        slot_policy: config::SlotPolicy::Fail,
        max_concurrency: 4,
    };
    let (status, body) = get(
        &app_with_feed(&pool, &strict),
        &format!("/api/posts/following/{}", me),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("slot"));

    let (status, body) = get(&app(&pool), &format!("/api/posts/following/{}", me)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["posts"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn malformed_viewer_id_is_rejected() {
    let pool = setup_pool().await;
    let (status, _) = get(&app(&pool), "/api/feed/not-a-uuid").await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn explore_lists_images_on_both_paths() {
    let pool = setup_pool().await;
    let ann = add_user(&pool, "ann").await;
    add_post(&pool, ann, "post", None).await;
    add_post(&pool, ann, "video", None).await;
    let app = app(&pool);

    for path in ["/explore", "/exploare"] {
        let (status, body) = get(&app, path).await;
        assert_eq!(status, StatusCode::OK);
        let tiles = body.as_array().unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0]["uuid"], ann.to_string());
    }
}

#[tokio::test]
async fn friends_carry_close_friend_flag() {
    let pool = setup_pool().await;
    let me = add_user(&pool, "me").await;
    let ann = add_user(&pool, "ann").await;
    let ben = add_user(&pool, "ben").await;
    follow(&pool, me, ben, true).await;
    follow(&pool, me, ann, false).await;

    let (status, body) = get(&app(&pool), &format!("/api/friends/{}", me)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"uuid": ben.to_string(), "username": "ben", "avatar": null, "badge": null,
             "image_updated_at": null, "closed_friend": true},
            {"uuid": ann.to_string(), "username": "ann", "avatar": null, "badge": null,
             "image_updated_at": null, "closed_friend": false},
        ])
    );
}

#[tokio::test]
async fn comments_include_their_authors() {
    let pool = setup_pool().await;
    let ann = add_user(&pool, "ann").await;
    let post = add_post(&pool, ann, "post", None).await;
    let ghost = Uuid::new_v4();
    for (who, text) in [(ann, "lovely"), (ghost, "boo")] {
        sqlx::query("INSERT INTO comments (post_id, comment, uuid) VALUES (?, ?, ?)")
            .bind(post)
            .bind(text)
            .bind(who.to_string())
            .execute(&pool)
            .await
            .unwrap();
    }

    let (status, body) = get(&app(&pool), &format!("/api/comments/{}", post)).await;
    assert_eq!(status, StatusCode::OK);
    let comments = body["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["comment"], "lovely");
    assert_eq!(comments[0]["user"]["username"], "ann");
    assert_eq!(comments[1]["user"], Value::Null);
}

#[tokio::test]
async fn hashtag_lists_tagged_posts() {
    let pool = setup_pool().await;
    let ann = add_user(&pool, "ann").await;
    let tagged = add_post(&pool, ann, "post", Some("sunset")).await;
    add_post(&pool, ann, "post", Some("coffee")).await;

    let (status, body) = get(&app(&pool), "/api/hashtag/sunset").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hashtag"], "sunset");
    let posts = body["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["id"], tagged);
}
