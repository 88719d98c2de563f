//! Row types of the `user_feeds` and `users` tables and their domain conversions.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use feedpulse_common::error::{AppError, AppResult};
use feedpulse_common::types::{
    ExternalCredential, Feed, FeedConnections, FeedDisabledCode, FeedForDelivery, FeedFormatOptions,
    FeedOwner, UserPreferences,
};
use feedpulse_engine::ports::{DueLookupFeed, RateSyncFeed, RefreshRateTargets};

#[derive(Debug, sqlx::FromRow)]
pub struct FeedRow {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub discord_user_id: String,
    pub refresh_rate_seconds: i32,
    pub user_refresh_rate_seconds: Option<i32>,
    pub slot_offset_ms: i64,
    pub health_status: String,
    pub disabled_code: Option<String>,
    pub lookup_key: Option<String>,
    pub max_daily_articles: i32,
    pub debug: bool,
    pub connections: Json<FeedConnections>,
    pub passing_comparisons: Vec<String>,
    pub blocking_comparisons: Vec<String>,
    pub format_options: Option<Json<FeedFormatOptions>>,
    pub date_check_options: Option<serde_json::Value>,
    pub external_properties: Json<Vec<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FeedRow> for Feed {
    type Error = AppError;

    fn try_from(row: FeedRow) -> AppResult<Self> {
        Ok(Feed {
            id: row.id,
            title: row.title,
            url: row.url,
            discord_user_id: row.discord_user_id,
            refresh_rate_seconds: to_u32(row.refresh_rate_seconds),
            user_refresh_rate_seconds: row.user_refresh_rate_seconds.map(to_u32),
            slot_offset_ms: u64::try_from(row.slot_offset_ms).unwrap_or(0),
            health_status: row.health_status.parse()?,
            disabled_code: row
                .disabled_code
                .as_deref()
                .map(str::parse::<FeedDisabledCode>)
                .transpose()?,
            lookup_key: row.lookup_key,
            max_daily_articles: to_u32(row.max_daily_articles),
            debug: row.debug,
            connections: row.connections.0,
            passing_comparisons: row.passing_comparisons,
            blocking_comparisons: row.blocking_comparisons,
            format_options: row.format_options.map(|Json(options)| options),
            date_check_options: row.date_check_options,
            external_properties: row.external_properties.0,
            created_at: row.created_at,
        })
    }
}

/// A feed joined with its owner's row, absent when the owner is unknown.
#[derive(Debug, sqlx::FromRow)]
pub struct FeedDeliveryRow {
    #[sqlx(flatten)]
    pub feed: FeedRow,
    pub owner_discord_user_id: Option<String>,
    pub owner_preferences: Option<Json<UserPreferences>>,
    pub owner_external_credentials: Option<Json<Vec<ExternalCredential>>>,
}

impl TryFrom<FeedDeliveryRow> for FeedForDelivery {
    type Error = AppError;

    fn try_from(row: FeedDeliveryRow) -> AppResult<Self> {
        let owner = row.owner_discord_user_id.map(|discord_user_id| FeedOwner {
            discord_user_id,
            preferences: row
                .owner_preferences
                .map(|Json(p)| p)
                .unwrap_or_default(),
            external_credentials: row
                .owner_external_credentials
                .map(|Json(c)| c)
                .unwrap_or_default(),
        });

        Ok(FeedForDelivery {
            feed: row.feed.try_into()?,
            owner,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DueLookupRow {
    pub url: String,
    pub lookup_key: String,
    pub debug: bool,
    pub external_credentials: Option<Json<Vec<ExternalCredential>>>,
}

impl From<DueLookupRow> for DueLookupFeed {
    fn from(row: DueLookupRow) -> Self {
        DueLookupFeed {
            url: row.url,
            lookup_key: row.lookup_key,
            debug: row.debug,
            external_credentials: row
                .external_credentials
                .map(|Json(c)| c)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RateSyncRow {
    pub id: Uuid,
    pub url: String,
    pub discord_user_id: String,
    pub refresh_rate_seconds: i32,
    pub user_refresh_rate_seconds: Option<i32>,
}

impl RateSyncRow {
    /// `None` when the stored rate already matches the owner's target.
    pub fn into_sync_feed(self, targets: &RefreshRateTargets) -> Option<RateSyncFeed> {
        let target = targets.target_for(&self.discord_user_id);
        let current = to_u32(self.refresh_rate_seconds);
        (current != target).then(|| RateSyncFeed {
            id: self.id,
            url: self.url,
            refresh_rate_seconds: current,
            user_refresh_rate_seconds: self.user_refresh_rate_seconds.map(to_u32),
            target_refresh_rate_seconds: target,
        })
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

/// Clamp into the range of a Postgres INTEGER column.
pub fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
