use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::PgPool;
use uuid::Uuid;

use feedpulse_common::error::{AppError, AppResult};
use feedpulse_common::events::FeedLookup;
use feedpulse_common::types::{
    ConnectionDisabledCode, ConnectionKind, Feed, FeedDisabledCode, FeedForDelivery,
    FeedHealthStatus,
};
use feedpulse_engine::SlotWindow;
use feedpulse_engine::ports::{
    ArticleLimitTargets, DueLookupFeed, FeedRepository, RateSyncFeed, RefreshRateTargets,
    SlotOffsetUpdate,
};

use crate::rows::{DueLookupRow, FeedDeliveryRow, FeedRow, RateSyncRow, to_i32, to_i64};

macro_rules! feed_columns {
    () => {
        r#"f.id, f.title, f.url, f.discord_user_id, f.refresh_rate_seconds,
           f.user_refresh_rate_seconds, f.slot_offset_ms, f.health_status, f.disabled_code,
           f.lookup_key, f.max_daily_articles, f.debug, f.connections, f.passing_comparisons,
           f.blocking_comparisons, f.format_options, f.date_check_options,
           f.external_properties, f.created_at"#
    };
}

/// Due for dispatch: $1 rate, $2 window start, $3 window end, $4 wraps, $5 wrapped end.
macro_rules! due_filter {
    () => {
        r#"f.disabled_code IS NULL
           AND f.health_status <> 'failed'
           AND jsonb_array_length(COALESCE(f.connections->'discordChannels', '[]'::jsonb))
             + jsonb_array_length(COALESCE(f.connections->'discordWebhooks', '[]'::jsonb)) > 0
           AND COALESCE(f.user_refresh_rate_seconds, f.refresh_rate_seconds) = $1
           AND (
             (NOT $4 AND f.slot_offset_ms >= $2 AND f.slot_offset_ms < $3)
             OR ($4 AND (f.slot_offset_ms >= $2 OR f.slot_offset_ms < $5))
           )"#
    };
}

/// Deliverable: $2 rate.
macro_rules! delivery_select {
    () => {
        concat!(
            "SELECT ",
            feed_columns!(),
            r#",
                u.discord_user_id AS owner_discord_user_id,
                u.preferences AS owner_preferences,
                u.external_credentials AS owner_external_credentials
            FROM user_feeds f
            LEFT JOIN users u ON u.discord_user_id = f.discord_user_id
            WHERE f.disabled_code IS NULL
              AND COALESCE(f.user_refresh_rate_seconds, f.refresh_rate_seconds) = $2
              AND EXISTS (
                SELECT 1
                FROM jsonb_array_elements(
                  COALESCE(f.connections->'discordChannels', '[]'::jsonb)
                  || COALESCE(f.connections->'discordWebhooks', '[]'::jsonb)
                ) AS c
                WHERE c->>'disabledCode' IS NULL
              )"#
        )
    };
}

const DUE_URLS_SQL: &str = concat!(
    "SELECT DISTINCT f.url FROM user_feeds f WHERE f.lookup_key IS NULL AND ",
    due_filter!()
);

const DUE_LOOKUP_FEEDS_SQL: &str = concat!(
    r#"SELECT DISTINCT ON (f.lookup_key) f.url, f.lookup_key, f.debug, u.external_credentials
       FROM user_feeds f
       LEFT JOIN users u ON u.discord_user_id = f.discord_user_id
       WHERE f.lookup_key IS NOT NULL AND "#,
    due_filter!(),
    " ORDER BY f.lookup_key, f.created_at"
);

const DELIVERY_BY_URL_SQL: &str = concat!(
    delivery_select!(),
    " AND f.url = $1 AND f.lookup_key IS NULL ORDER BY f.created_at"
);

const DELIVERY_BY_LOOKUP_KEY_SQL: &str = concat!(
    delivery_select!(),
    " AND f.lookup_key = $1 ORDER BY f.created_at"
);

const FIND_BY_ID_SQL: &str = concat!(
    "SELECT ",
    feed_columns!(),
    " FROM user_feeds f WHERE f.id = $1"
);

/// PostgreSQL-backed [`FeedRepository`].
#[derive(Clone)]
pub struct PgFeedRepository {
    pool: PgPool,
}

impl PgFeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write a per-user value onto a feed column, falling back to `default`
    /// for users without an entry. Returns rows changed.
    async fn sync_user_column(
        &self,
        column: &'static str,
        by_user: &HashMap<String, u32>,
        default: u32,
    ) -> AppResult<u64> {
        let (user_ids, values): (Vec<String>, Vec<i32>) = by_user
            .iter()
            .map(|(user, value)| (user.clone(), to_i32(*value)))
            .unzip();

        let sql = format!(
            r#"
            WITH targets AS (
                SELECT * FROM UNNEST($1::text[], $2::int4[]) AS t(discord_user_id, value)
            ),
            desired AS (
                SELECT f.id, COALESCE(t.value, $3) AS value
                FROM user_feeds f
                LEFT JOIN targets t ON t.discord_user_id = f.discord_user_id
            )
            UPDATE user_feeds f
            SET {column} = d.value
            FROM desired d
            WHERE f.id = d.id AND f.{column} <> d.value
            "#
        );

        let result = sqlx::query(&sql)
            .bind(user_ids)
            .bind(values)
            .bind(to_i32(default))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Predicate selecting the feeds an event correlates with, bound at `$1`.
fn lookup_predicate(lookup: &FeedLookup) -> (&'static str, &str) {
    match lookup {
        FeedLookup::Url(url) => ("url = $1 AND lookup_key IS NULL", url),
        FeedLookup::LookupKey(key) => ("lookup_key = $1", key),
    }
}

fn window_params(window: &SlotWindow) -> (i64, i64, bool, i64) {
    (
        to_i64(window.window_start_ms),
        to_i64(window.window_end_ms),
        window.wraps_around_interval,
        to_i64(window.wrapped_end_ms().unwrap_or(0)),
    )
}

#[async_trait]
impl FeedRepository for PgFeedRepository {
    fn iterate_urls_for_refresh_rate(
        &self,
        refresh_rate_seconds: u32,
        window: SlotWindow,
    ) -> BoxStream<'_, AppResult<String>> {
        let (start, end, wraps, wrapped_end) = window_params(&window);

        sqlx::query_scalar::<_, String>(DUE_URLS_SQL)
            .bind(to_i32(refresh_rate_seconds))
            .bind(start)
            .bind(end)
            .bind(wraps)
            .bind(wrapped_end)
            .fetch(&self.pool)
            .map_err(AppError::from)
            .boxed()
    }

    fn iterate_lookup_key_feeds_for_refresh_rate(
        &self,
        refresh_rate_seconds: u32,
        window: SlotWindow,
    ) -> BoxStream<'_, AppResult<DueLookupFeed>> {
        let (start, end, wraps, wrapped_end) = window_params(&window);

        sqlx::query_as::<_, DueLookupRow>(DUE_LOOKUP_FEEDS_SQL)
            .bind(to_i32(refresh_rate_seconds))
            .bind(start)
            .bind(end)
            .bind(wraps)
            .bind(wrapped_end)
            .fetch(&self.pool)
            .map_ok(DueLookupFeed::from)
            .map_err(AppError::from)
            .boxed()
    }

    async fn find_debug_urls(&self) -> AppResult<HashSet<String>> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT DISTINCT url FROM user_feeds WHERE debug")
            .fetch_all(&self.pool)
            .await?;

        Ok(urls.into_iter().collect())
    }

    fn iterate_for_refresh_rate_sync<'a>(
        &'a self,
        targets: &'a RefreshRateTargets,
    ) -> BoxStream<'a, AppResult<RateSyncFeed>> {
        sqlx::query_as::<_, RateSyncRow>(
            r#"
            SELECT id, url, discord_user_id, refresh_rate_seconds, user_refresh_rate_seconds
            FROM user_feeds
            "#,
        )
        .fetch(&self.pool)
        .map_err(AppError::from)
        .try_filter_map(move |row| future::ready(Ok(row.into_sync_feed(targets))))
        .boxed()
    }

    async fn bulk_update_slot_offsets(&self, updates: &[SlotOffsetUpdate]) -> AppResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let (ids, offsets): (Vec<Uuid>, Vec<i64>) = updates
            .iter()
            .map(|u| (u.id, to_i64(u.slot_offset_ms)))
            .unzip();

        sqlx::query(
            r#"
            UPDATE user_feeds f
            SET slot_offset_ms = u.slot_offset_ms
            FROM UNNEST($1::uuid[], $2::int8[]) AS u(id, slot_offset_ms)
            WHERE f.id = u.id
            "#,
        )
        .bind(ids)
        .bind(offsets)
        .execute(&self.pool)
        .await?;

        tracing::debug!(count = updates.len(), "Updated slot offsets");
        Ok(())
    }

    async fn sync_refresh_rates(&self, targets: &RefreshRateTargets) -> AppResult<u64> {
        self.sync_user_column(
            "refresh_rate_seconds",
            &targets.by_user,
            targets.default_rate_seconds,
        )
        .await
    }

    async fn sync_max_daily_articles(&self, targets: &ArticleLimitTargets) -> AppResult<u64> {
        self.sync_user_column(
            "max_daily_articles",
            &targets.by_user,
            targets.default_max_daily_articles,
        )
        .await
    }

    async fn update_health_status_by_filter(
        &self,
        lookup: &FeedLookup,
        status: FeedHealthStatus,
    ) -> AppResult<u64> {
        let (predicate, value) = lookup_predicate(lookup);
        let sql = format!(
            "UPDATE user_feeds SET health_status = $2 WHERE {predicate} AND health_status <> $2"
        );

        let result = sqlx::query(&sql)
            .bind(value)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count_not_in_health_status(
        &self,
        lookup: &FeedLookup,
        status: FeedHealthStatus,
    ) -> AppResult<u64> {
        let (predicate, value) = lookup_predicate(lookup);
        let sql =
            format!("SELECT COUNT(*) FROM user_feeds WHERE {predicate} AND health_status <> $2");

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(value)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn iterate_for_delivery(
        &self,
        url: String,
        refresh_rate_seconds: u32,
    ) -> BoxStream<'_, AppResult<FeedForDelivery>> {
        sqlx::query_as::<_, FeedDeliveryRow>(DELIVERY_BY_URL_SQL)
            .bind(url)
            .bind(to_i32(refresh_rate_seconds))
            .fetch(&self.pool)
            .map_err(AppError::from)
            .and_then(|row| future::ready(FeedForDelivery::try_from(row)))
            .boxed()
    }

    fn iterate_lookup_key_feeds_for_delivery(
        &self,
        lookup_key: String,
        refresh_rate_seconds: u32,
    ) -> BoxStream<'_, AppResult<FeedForDelivery>> {
        sqlx::query_as::<_, FeedDeliveryRow>(DELIVERY_BY_LOOKUP_KEY_SQL)
            .bind(lookup_key)
            .bind(to_i32(refresh_rate_seconds))
            .fetch(&self.pool)
            .map_err(AppError::from)
            .and_then(|row| future::ready(FeedForDelivery::try_from(row)))
            .boxed()
    }

    async fn disable_by_filter_if_not_disabled(
        &self,
        lookup: &FeedLookup,
        code: FeedDisabledCode,
    ) -> AppResult<u64> {
        let (predicate, value) = lookup_predicate(lookup);
        let sql = format!(
            "UPDATE user_feeds SET disabled_code = $2 WHERE {predicate} AND disabled_code IS NULL"
        );

        let result = sqlx::query(&sql)
            .bind(value)
            .bind(code.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_ids_without_disabled_code(&self, lookup: &FeedLookup) -> AppResult<Vec<Uuid>> {
        let (predicate, value) = lookup_predicate(lookup);
        let sql = format!("SELECT id FROM user_feeds WHERE {predicate} AND disabled_code IS NULL");

        let ids: Vec<Uuid> = sqlx::query_scalar(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    async fn disable_and_set_health_status(
        &self,
        ids: &[Uuid],
        code: FeedDisabledCode,
        status: FeedHealthStatus,
    ) -> AppResult<Vec<Uuid>> {
        let changed: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE user_feeds
            SET disabled_code = $1, health_status = $2
            WHERE id = ANY($3) AND disabled_code IS NULL
            RETURNING id
            "#,
        )
        .bind(code.as_str())
        .bind(status.as_str())
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(changed)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(FIND_BY_ID_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Feed::try_from).transpose()
    }

    async fn disable_by_id_if_not_disabled(&self, id: Uuid, code: FeedDisabledCode) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE user_feeds SET disabled_code = $2 WHERE id = $1 AND disabled_code IS NULL",
        )
        .bind(id)
        .bind(code.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_connection_disabled_code(
        &self,
        feed_id: Uuid,
        kind: ConnectionKind,
        index: usize,
        code: ConnectionDisabledCode,
        detail: Option<&str>,
    ) -> AppResult<bool> {
        let connection_path = vec![kind.as_key().to_string(), index.to_string()];
        let field_path = |field: &str| {
            let mut path = connection_path.clone();
            path.push(field.to_string());
            path
        };

        let result = sqlx::query(
            r#"
            UPDATE user_feeds
            SET connections = jsonb_set(
                jsonb_set(connections, $2::text[], to_jsonb($3::text)),
                $4::text[],
                COALESCE(to_jsonb($5::text), 'null'::jsonb)
            )
            WHERE id = $1
              AND connections #> $6::text[] IS NOT NULL
              AND connections #>> $2::text[] IS NULL
            "#,
        )
        .bind(feed_id)
        .bind(field_path("disabledCode"))
        .bind(code.as_str())
        .bind(field_path("disabledDetail"))
        .bind(detail)
        .bind(connection_path.clone())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                feed_id = %feed_id,
                connection_index = index,
                "Connection to disable is missing or already disabled"
            );
        }

        Ok(result.rows_affected() > 0)
    }
}
