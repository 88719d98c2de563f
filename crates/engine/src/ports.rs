//! Collaborator interfaces consumed by the scheduler and the events service.
//!
//! Persistence, entitlements, notifications, feed-limit enforcement and
//! lookup-key synchronisation all live outside this crate.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use feedpulse_common::error::AppResult;
use feedpulse_common::events::FeedLookup;
use feedpulse_common::types::{
    ConnectionDisabledCode, ConnectionKind, ExternalCredential, Feed, FeedDisabledCode,
    FeedForDelivery, FeedHealthStatus, UserBenefits,
};

use crate::slot::SlotWindow;

/// A due lookup-key feed together with the owner's credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct DueLookupFeed {
    pub url: String,
    pub lookup_key: String,
    pub debug: bool,
    pub external_credentials: Vec<ExternalCredential>,
}

/// A feed whose refresh rate differs from its owner's target rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSyncFeed {
    pub id: Uuid,
    pub url: String,
    pub refresh_rate_seconds: u32,
    pub user_refresh_rate_seconds: Option<u32>,
    pub target_refresh_rate_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOffsetUpdate {
    pub id: Uuid,
    pub slot_offset_ms: u64,
}

/// Refresh rate every user's feeds should carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshRateTargets {
    pub by_user: HashMap<String, u32>,
    pub default_rate_seconds: u32,
}

impl RefreshRateTargets {
    pub fn target_for(&self, discord_user_id: &str) -> u32 {
        self.by_user
            .get(discord_user_id)
            .copied()
            .unwrap_or(self.default_rate_seconds)
    }
}

/// Daily article limit every user's feeds should carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleLimitTargets {
    pub by_user: HashMap<String, u32>,
    pub default_max_daily_articles: u32,
}

impl ArticleLimitTargets {
    pub fn target_for(&self, discord_user_id: &str) -> u32 {
        self.by_user
            .get(discord_user_id)
            .copied()
            .unwrap_or(self.default_max_daily_articles)
    }
}

/// Feed persistence. Every mutation is a single filter-qualified update, so
/// replaying an event never changes the outcome.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Distinct URLs of enabled, non-failed, URL-keyed feeds with at least one
    /// connection whose effective rate is `refresh_rate_seconds` and whose slot
    /// lies in `window`.
    fn iterate_urls_for_refresh_rate(
        &self,
        refresh_rate_seconds: u32,
        window: SlotWindow,
    ) -> BoxStream<'_, AppResult<String>>;

    /// Same selection as [`Self::iterate_urls_for_refresh_rate`] for lookup-key
    /// feeds, one per lookup key.
    fn iterate_lookup_key_feeds_for_refresh_rate(
        &self,
        refresh_rate_seconds: u32,
        window: SlotWindow,
    ) -> BoxStream<'_, AppResult<DueLookupFeed>>;

    async fn find_debug_urls(&self) -> AppResult<HashSet<String>>;

    /// Feeds whose stored refresh rate differs from their owner's target.
    fn iterate_for_refresh_rate_sync<'a>(
        &'a self,
        targets: &'a RefreshRateTargets,
    ) -> BoxStream<'a, AppResult<RateSyncFeed>>;

    async fn bulk_update_slot_offsets(&self, updates: &[SlotOffsetUpdate]) -> AppResult<()>;

    /// Write every user's target refresh rate onto their feeds. Returns rows changed.
    async fn sync_refresh_rates(&self, targets: &RefreshRateTargets) -> AppResult<u64>;

    /// Write every user's daily article limit onto their feeds. Returns rows changed.
    async fn sync_max_daily_articles(&self, targets: &ArticleLimitTargets) -> AppResult<u64>;

    /// Set `status` on matching feeds whose status differs. Returns rows changed.
    async fn update_health_status_by_filter(
        &self,
        lookup: &FeedLookup,
        status: FeedHealthStatus,
    ) -> AppResult<u64>;

    async fn count_not_in_health_status(
        &self,
        lookup: &FeedLookup,
        status: FeedHealthStatus,
    ) -> AppResult<u64>;

    /// Enabled URL-keyed feeds for `url` at `refresh_rate_seconds` that have at
    /// least one enabled connection.
    fn iterate_for_delivery(
        &self,
        url: String,
        refresh_rate_seconds: u32,
    ) -> BoxStream<'_, AppResult<FeedForDelivery>>;

    fn iterate_lookup_key_feeds_for_delivery(
        &self,
        lookup_key: String,
        refresh_rate_seconds: u32,
    ) -> BoxStream<'_, AppResult<FeedForDelivery>>;

    async fn disable_by_filter_if_not_disabled(
        &self,
        lookup: &FeedLookup,
        code: FeedDisabledCode,
    ) -> AppResult<u64>;

    async fn find_ids_without_disabled_code(&self, lookup: &FeedLookup) -> AppResult<Vec<Uuid>>;

    /// Disable the given feeds that are still enabled. Returns the ids that changed.
    async fn disable_and_set_health_status(
        &self,
        ids: &[Uuid],
        code: FeedDisabledCode,
        status: FeedHealthStatus,
    ) -> AppResult<Vec<Uuid>>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Feed>>;

    /// Returns whether the feed transitioned from enabled to disabled.
    async fn disable_by_id_if_not_disabled(&self, id: Uuid, code: FeedDisabledCode) -> AppResult<bool>;

    /// Disable the connection at `index` unless it already carries a code.
    /// Returns whether the connection transitioned.
    async fn set_connection_disabled_code(
        &self,
        feed_id: Uuid,
        kind: ConnectionKind,
        index: usize,
        code: ConnectionDisabledCode,
        detail: Option<&str>,
    ) -> AppResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Entitlements: Send + Sync {
    async fn get_benefits_of_user(&self, discord_user_id: &str) -> AppResult<UserBenefits>;

    async fn get_benefits_of_all_users(&self) -> AppResult<Vec<UserBenefits>>;

    async fn sync_discord_supporter_roles(&self, discord_user_id: &str) -> AppResult<()>;
}

/// Alert sent when a connection is disabled after an article was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDisabledAlert {
    pub feed_id: Uuid,
    pub feed_title: String,
    pub discord_user_id: String,
    pub connection_id: Uuid,
    pub connection_name: String,
    pub connection_kind: ConnectionKind,
    pub disabled_code: ConnectionDisabledCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_message: Option<String>,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_disabled_feeds_alert(
        &self,
        feed_ids: Vec<Uuid>,
        code: FeedDisabledCode,
    ) -> AppResult<()>;

    async fn send_disabled_connection_alert(&self, alert: ConnectionDisabledAlert) -> AppResult<()>;
}

/// Per-user limits handed to the feed-limit enforcer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFeedLimit {
    pub discord_user_id: String,
    pub max_user_feeds: u32,
    pub refresh_rate_seconds: u32,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedLimitEnforcer: Send + Sync {
    async fn enforce_all_user_feed_limits(&self, limits: Vec<UserFeedLimit>) -> AppResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LookupKeySync: Send + Sync {
    async fn sync_lookup_keys(&self) -> AppResult<()>;
}
