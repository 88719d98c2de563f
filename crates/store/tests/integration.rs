//! Integration tests for the PostgreSQL feed repository.
//!
//! These tests require a running PostgreSQL database and the `DATABASE_URL`
//! environment variable to be set. Run with:
//!
//! ```bash
//! DATABASE_URL="postgresql://..." cargo test -p feedpulse-store --test integration -- --ignored --nocapture
//! ```

use std::collections::HashMap;

use futures::TryStreamExt;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use feedpulse_common::events::FeedLookup;
use feedpulse_common::types::{
    ChannelTarget, ConnectionDisabledCode, ConnectionKind, DiscordConnection,
    DiscordConnectionDetails, FeedConnections, FeedDisabledCode, FeedHealthStatus,
};
use feedpulse_engine::ports::{ArticleLimitTargets, FeedRepository, RefreshRateTargets, SlotOffsetUpdate};
use feedpulse_engine::{SlotWindow, calculate_slot_offset_ms};
use feedpulse_store::PgFeedRepository;

const RATE: u32 = 600;

async fn setup(pool: &PgPool) -> PgFeedRepository {
    sqlx::migrate!("../../migrations").run(pool).await.unwrap();

    sqlx::query("DELETE FROM user_feeds").execute(pool).await.unwrap();
    sqlx::query("DELETE FROM users").execute(pool).await.unwrap();

    PgFeedRepository::new(pool.clone())
}

fn connection() -> DiscordConnection {
    DiscordConnection {
        id: Uuid::new_v4(),
        name: "announcements".to_string(),
        disabled_code: None,
        disabled_detail: None,
        filters: None,
        rate_limits: None,
        mentions: None,
        custom_placeholders: vec![],
        split_options: None,
        created_at: None,
        details: DiscordConnectionDetails {
            channel: Some(ChannelTarget {
                id: "channel-1".to_string(),
                channel_type: None,
                guild_id: "guild-1".to_string(),
            }),
            ..Default::default()
        },
    }
}

struct NewFeed<'a> {
    url: &'a str,
    user: &'a str,
    lookup_key: Option<&'a str>,
    health_status: &'a str,
    disabled_code: Option<&'a str>,
    connections: FeedConnections,
}

impl<'a> NewFeed<'a> {
    fn new(url: &'a str) -> Self {
        Self {
            url,
            user: "user-1",
            lookup_key: None,
            health_status: "ok",
            disabled_code: None,
            connections: FeedConnections {
                discord_channels: vec![connection()],
                discord_webhooks: vec![],
            },
        }
    }
}

async fn insert_feed(pool: &PgPool, feed: NewFeed<'_>) -> Uuid {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO user_feeds (title, url, discord_user_id, refresh_rate_seconds, slot_offset_ms,
                                health_status, disabled_code, lookup_key, max_daily_articles, connections)
        VALUES ('Feed', $1, $2, $3, $4, $5, $6, $7, 50, $8)
        RETURNING id
        "#,
    )
    .bind(feed.url)
    .bind(feed.user)
    .bind(RATE as i32)
    .bind(calculate_slot_offset_ms(feed.url, RATE) as i64)
    .bind(feed.health_status)
    .bind(feed.disabled_code)
    .bind(feed.lookup_key)
    .bind(serde_json::to_value(&feed.connections).unwrap())
    .fetch_one(pool)
    .await
    .unwrap();

    id
}

/// A window covering the whole interval.
fn full_window() -> SlotWindow {
    SlotWindow {
        window_start_ms: 0,
        window_end_ms: u64::from(RATE) * 1000,
        wraps_around_interval: false,
        refresh_rate_ms: u64::from(RATE) * 1000,
    }
}

#[sqlx::test]
#[ignore] // Requires DATABASE_URL — run explicitly with --ignored
async fn test_due_urls_are_distinct_and_filtered(pool: PgPool) {
    let repo = setup(&pool).await;

    insert_feed(&pool, NewFeed::new("https://a.com/f.xml")).await;
    insert_feed(&pool, NewFeed::new("https://a.com/f.xml")).await;
    insert_feed(&pool, NewFeed { health_status: "failed", ..NewFeed::new("https://failed.com") }).await;
    insert_feed(&pool, NewFeed { disabled_code: Some("MANUAL"), ..NewFeed::new("https://off.com") })
        .await;
    insert_feed(
        &pool,
        NewFeed { connections: FeedConnections::default(), ..NewFeed::new("https://none.com") },
    )
    .await;
    insert_feed(&pool, NewFeed { lookup_key: Some("k"), ..NewFeed::new("https://keyed.com") }).await;

    let urls: Vec<String> = repo
        .iterate_urls_for_refresh_rate(RATE, full_window())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(urls, vec!["https://a.com/f.xml".to_string()]);

    let keyed: Vec<_> = repo
        .iterate_lookup_key_feeds_for_refresh_rate(RATE, full_window())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(keyed.len(), 1);
    assert_eq!(keyed[0].lookup_key, "k");
}

#[sqlx::test]
#[ignore]
async fn test_window_predicate_matches_wrapping_window(pool: PgPool) {
    let repo = setup(&pool).await;
    let url = "https://a.com/f.xml";
    insert_feed(&pool, NewFeed::new(url)).await;

    let slot = calculate_slot_offset_ms(url, RATE);
    let inside = SlotWindow::at(RATE, slot);
    let outside = SlotWindow::at(RATE, slot + 60_000);

    let hit: Vec<String> = repo.iterate_urls_for_refresh_rate(RATE, inside).try_collect().await.unwrap();
    let miss: Vec<String> = repo.iterate_urls_for_refresh_rate(RATE, outside).try_collect().await.unwrap();
    assert_eq!(hit.len(), 1);
    assert!(miss.is_empty());

    // window starting 30s before the end of the interval wraps to cover [0, 30s)
    let wrapping = SlotWindow::at(RATE, u64::from(RATE) * 1000 - 30_000);
    assert!(wrapping.wraps_around_interval);
    sqlx::query("UPDATE user_feeds SET slot_offset_ms = 10000").execute(&pool).await.unwrap();
    let wrapped: Vec<String> = repo.iterate_urls_for_refresh_rate(RATE, wrapping).try_collect().await.unwrap();
    assert_eq!(wrapped.len(), 1);
}

#[sqlx::test]
#[ignore]
async fn test_health_updates_are_filter_qualified(pool: PgPool) {
    let repo = setup(&pool).await;
    let url = "https://a.com/f.xml";
    insert_feed(&pool, NewFeed::new(url)).await;
    insert_feed(&pool, NewFeed { lookup_key: Some("k"), ..NewFeed::new(url) }).await;

    let lookup = FeedLookup::Url(url.to_string());
    assert_eq!(repo.update_health_status_by_filter(&lookup, FeedHealthStatus::Failing).await.unwrap(), 1);
    assert_eq!(repo.update_health_status_by_filter(&lookup, FeedHealthStatus::Failing).await.unwrap(), 0);
    assert_eq!(repo.count_not_in_health_status(&lookup, FeedHealthStatus::Ok).await.unwrap(), 1);

    let keyed = FeedLookup::LookupKey("k".to_string());
    assert_eq!(repo.count_not_in_health_status(&keyed, FeedHealthStatus::Ok).await.unwrap(), 0);
}

#[sqlx::test]
#[ignore]
async fn test_disable_transitions_happen_once(pool: PgPool) {
    let repo = setup(&pool).await;
    let url = "https://a.com/f.xml";
    let enabled = insert_feed(&pool, NewFeed::new(url)).await;
    let manual = insert_feed(&pool, NewFeed { disabled_code: Some("MANUAL"), ..NewFeed::new(url) }).await;

    let lookup = FeedLookup::Url(url.to_string());
    let candidates = repo.find_ids_without_disabled_code(&lookup).await.unwrap();
    assert_eq!(candidates, vec![enabled]);

    let changed = repo
        .disable_and_set_health_status(
            &[enabled, manual],
            FeedDisabledCode::FailedRequests,
            FeedHealthStatus::Failed,
        )
        .await
        .unwrap();
    assert_eq!(changed, vec![enabled]);

    let replay = repo
        .disable_and_set_health_status(&[enabled], FeedDisabledCode::FailedRequests, FeedHealthStatus::Failed)
        .await
        .unwrap();
    assert!(replay.is_empty());

    let feed = repo.find_by_id(enabled).await.unwrap().unwrap();
    assert_eq!(feed.disabled_code, Some(FeedDisabledCode::FailedRequests));
    assert_eq!(feed.health_status, FeedHealthStatus::Failed);
    let manual = repo.find_by_id(manual).await.unwrap().unwrap();
    assert_eq!(manual.disabled_code, Some(FeedDisabledCode::Manual));

    assert!(!repo.disable_by_id_if_not_disabled(enabled, FeedDisabledCode::InvalidFeed).await.unwrap());
}

#[sqlx::test]
#[ignore]
async fn test_set_connection_disabled_code_targets_one_connection(pool: PgPool) {
    let repo = setup(&pool).await;
    let connections = FeedConnections {
        discord_channels: vec![connection()],
        discord_webhooks: vec![connection(), connection()],
    };
    let id = insert_feed(&pool, NewFeed { connections, ..NewFeed::new("https://a.com") }).await;

    assert!(
        repo.set_connection_disabled_code(
            id,
            ConnectionKind::DiscordWebhooks,
            1,
            ConnectionDisabledCode::MissingPermissions,
            Some("Missing Access"),
        )
        .await
        .unwrap()
    );
    // an existing code is kept
    assert!(
        !repo
            .set_connection_disabled_code(
                id,
                ConnectionKind::DiscordWebhooks,
                1,
                ConnectionDisabledCode::BadFormat,
                Some("Invalid Form Body"),
            )
            .await
            .unwrap()
    );
    // index past the end is ignored
    assert!(
        !repo
            .set_connection_disabled_code(id, ConnectionKind::DiscordChannels, 5, ConnectionDisabledCode::Unknown, None)
            .await
            .unwrap()
    );

    let feed = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(feed.connections.discord_channels.len(), 1);
    assert_eq!(feed.connections.discord_channels[0].disabled_code, None);
    assert_eq!(feed.connections.discord_webhooks[0].disabled_code, None);
    assert_eq!(
        feed.connections.discord_webhooks[1].disabled_code,
        Some(ConnectionDisabledCode::MissingPermissions)
    );
    assert_eq!(
        feed.connections.discord_webhooks[1].disabled_detail.as_deref(),
        Some("Missing Access")
    );
}

#[sqlx::test]
#[ignore]
async fn test_delivery_joins_owner_and_requires_enabled_connection(pool: PgPool) {
    let repo = setup(&pool).await;
    sqlx::query(
        "INSERT INTO users (discord_user_id, preferences) VALUES ('user-1', $1)",
    )
    .bind(json!({ "dateTimezone": "UTC" }))
    .execute(&pool)
    .await
    .unwrap();

    let url = "https://a.com/f.xml";
    let deliverable = insert_feed(&pool, NewFeed::new(url)).await;
    let mut disabled_connection = connection();
    disabled_connection.disabled_code = Some(ConnectionDisabledCode::BadFormat);
    insert_feed(
        &pool,
        NewFeed {
            connections: FeedConnections {
                discord_channels: vec![disabled_connection],
                discord_webhooks: vec![],
            },
            ..NewFeed::new(url)
        },
    )
    .await;

    let feeds: Vec<_> = repo
        .iterate_for_delivery(url.to_string(), RATE)
        .try_collect()
        .await
        .unwrap();

    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].feed.id, deliverable);
    let owner = feeds[0].owner.as_ref().unwrap();
    assert_eq!(owner.preferences.date_timezone.as_deref(), Some("UTC"));

    let other_rate: Vec<_> = repo
        .iterate_for_delivery(url.to_string(), 120)
        .try_collect()
        .await
        .unwrap();
    assert!(other_rate.is_empty());
}

#[sqlx::test]
#[ignore]
async fn test_maintenance_sync_writes_targets(pool: PgPool) {
    let repo = setup(&pool).await;
    let supporter_feed = insert_feed(&pool, NewFeed { user: "supporter", ..NewFeed::new("https://a.com") }).await;
    insert_feed(&pool, NewFeed::new("https://b.com")).await;

    let rate_targets = RefreshRateTargets {
        by_user: HashMap::from([("supporter".to_string(), 120)]),
        default_rate_seconds: RATE,
    };
    let pending: Vec<_> = repo
        .iterate_for_refresh_rate_sync(&rate_targets)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, supporter_feed);

    repo.bulk_update_slot_offsets(&[SlotOffsetUpdate {
        id: supporter_feed,
        slot_offset_ms: calculate_slot_offset_ms("https://a.com", 120),
    }])
    .await
    .unwrap();

    assert_eq!(repo.sync_refresh_rates(&rate_targets).await.unwrap(), 1);
    assert_eq!(repo.sync_refresh_rates(&rate_targets).await.unwrap(), 0);

    let limit_targets = ArticleLimitTargets {
        by_user: HashMap::from([("supporter".to_string(), 500)]),
        default_max_daily_articles: 50,
    };
    assert_eq!(repo.sync_max_daily_articles(&limit_targets).await.unwrap(), 1);

    let feed = repo.find_by_id(supporter_feed).await.unwrap().unwrap();
    assert_eq!(feed.refresh_rate_seconds, 120);
    assert_eq!(feed.max_daily_articles, 500);
    assert_eq!(feed.slot_offset_ms, calculate_slot_offset_ms("https://a.com", 120));
}
