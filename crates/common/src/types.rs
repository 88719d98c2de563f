use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Coarse signal of recent fetch success, independent of disablement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedHealthStatus {
    Ok,
    Failing,
    Failed,
}

impl FeedHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedHealthStatus::Ok => "ok",
            FeedHealthStatus::Failing => "failing",
            FeedHealthStatus::Failed => "failed",
        }
    }
}

impl FromStr for FeedHealthStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(FeedHealthStatus::Ok),
            "failing" => Ok(FeedHealthStatus::Failing),
            "failed" => Ok(FeedHealthStatus::Failed),
            other => Err(AppError::Internal(format!(
                "unknown feed health status '{other}'"
            ))),
        }
    }
}

/// Reason a feed has been halted. A feed carrying any code is never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedDisabledCode {
    Manual,
    FailedRequests,
    ExceededFeedLimit,
    InvalidFeed,
    FeedTooLarge,
    ExcessivelyActive,
}

impl FeedDisabledCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedDisabledCode::Manual => "MANUAL",
            FeedDisabledCode::FailedRequests => "FAILED_REQUESTS",
            FeedDisabledCode::ExceededFeedLimit => "EXCEEDED_FEED_LIMIT",
            FeedDisabledCode::InvalidFeed => "INVALID_FEED",
            FeedDisabledCode::FeedTooLarge => "FEED_TOO_LARGE",
            FeedDisabledCode::ExcessivelyActive => "EXCESSIVELY_ACTIVE",
        }
    }
}

impl FromStr for FeedDisabledCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(FeedDisabledCode::Manual),
            "FAILED_REQUESTS" => Ok(FeedDisabledCode::FailedRequests),
            "EXCEEDED_FEED_LIMIT" => Ok(FeedDisabledCode::ExceededFeedLimit),
            "INVALID_FEED" => Ok(FeedDisabledCode::InvalidFeed),
            "FEED_TOO_LARGE" => Ok(FeedDisabledCode::FeedTooLarge),
            "EXCESSIVELY_ACTIVE" => Ok(FeedDisabledCode::ExcessivelyActive),
            other => Err(AppError::Internal(format!(
                "unknown feed disabled code '{other}'"
            ))),
        }
    }
}

/// Reason a single delivery connection has been halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionDisabledCode {
    BadFormat,
    MissingMedium,
    MissingPermissions,
    Unknown,
}

impl ConnectionDisabledCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionDisabledCode::BadFormat => "BAD_FORMAT",
            ConnectionDisabledCode::MissingMedium => "MISSING_MEDIUM",
            ConnectionDisabledCode::MissingPermissions => "MISSING_PERMISSIONS",
            ConnectionDisabledCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for FeedHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for FeedDisabledCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for ConnectionDisabledCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The named connection collections a feed carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionKind {
    DiscordChannels,
    DiscordWebhooks,
}

impl ConnectionKind {
    /// Iteration order of the collections.
    pub const ALL: [ConnectionKind; 2] = [ConnectionKind::DiscordChannels, ConnectionKind::DiscordWebhooks];

    /// Key of the collection inside the stored `connections` document.
    pub fn as_key(&self) -> &'static str {
        match self {
            ConnectionKind::DiscordChannels => "discordChannels",
            ConnectionKind::DiscordWebhooks => "discordWebhooks",
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

/// A user's feed, the single mutable shared record of the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    /// Discord id of the owning user
    pub discord_user_id: String,
    /// Rate derived from the owner's benefits, synced during maintenance
    pub refresh_rate_seconds: u32,
    /// Slower rate chosen by the user; overrides `refresh_rate_seconds` when set
    pub user_refresh_rate_seconds: Option<u32>,
    pub slot_offset_ms: u64,
    pub health_status: FeedHealthStatus,
    pub disabled_code: Option<FeedDisabledCode>,
    /// Present when fetching requires per-user request details instead of the bare URL
    pub lookup_key: Option<String>,
    pub max_daily_articles: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub connections: FeedConnections,
    #[serde(default)]
    pub passing_comparisons: Vec<String>,
    #[serde(default)]
    pub blocking_comparisons: Vec<String>,
    pub format_options: Option<FeedFormatOptions>,
    pub date_check_options: Option<serde_json::Value>,
    #[serde(default)]
    pub external_properties: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// The rate the feed is actually polled at.
    pub fn effective_refresh_rate_seconds(&self) -> u32 {
        self.user_refresh_rate_seconds
            .unwrap_or(self.refresh_rate_seconds)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_code.is_some()
    }

    /// Whether any connection relies on custom placeholders (a premium feature).
    pub fn has_custom_placeholders(&self) -> bool {
        self.connections
            .iter()
            .any(|(_, connection)| !connection.custom_placeholders.is_empty())
    }

    /// Whether the feed extracts external properties (a premium feature).
    pub fn has_external_properties(&self) -> bool {
        !self.external_properties.is_empty()
    }
}

/// Date rendering overrides set on a feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedFormatOptions {
    pub date_format: Option<String>,
    pub date_timezone: Option<String>,
    pub date_locale: Option<String>,
}

/// Fixed set of typed connection collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConnections {
    #[serde(default)]
    pub discord_channels: Vec<DiscordConnection>,
    #[serde(default)]
    pub discord_webhooks: Vec<DiscordConnection>,
}

impl FeedConnections {
    pub fn get(&self, kind: ConnectionKind) -> &[DiscordConnection] {
        match kind {
            ConnectionKind::DiscordChannels => &self.discord_channels,
            ConnectionKind::DiscordWebhooks => &self.discord_webhooks,
        }
    }

    pub fn get_mut(&mut self, kind: ConnectionKind) -> &mut Vec<DiscordConnection> {
        match kind {
            ConnectionKind::DiscordChannels => &mut self.discord_channels,
            ConnectionKind::DiscordWebhooks => &mut self.discord_webhooks,
        }
    }

    /// All connections in collection order, tagged with their collection.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionKind, &DiscordConnection)> {
        ConnectionKind::ALL
            .into_iter()
            .flat_map(move |kind| self.get(kind).iter().map(move |c| (kind, c)))
    }

    /// Locate a connection by id, returning its collection and index.
    pub fn find(&self, connection_id: Uuid) -> Option<(ConnectionKind, usize, &DiscordConnection)> {
        ConnectionKind::ALL.into_iter().find_map(|kind| {
            self.get(kind)
                .iter()
                .enumerate()
                .find(|(_, c)| c.id == connection_id)
                .map(|(index, c)| (kind, index, c))
        })
    }

    pub fn is_empty(&self) -> bool {
        ConnectionKind::ALL
            .into_iter()
            .all(|kind| self.get(kind).is_empty())
    }
}

/// A delivery target of a feed (a Discord channel or webhook).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConnection {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub disabled_code: Option<ConnectionDisabledCode>,
    #[serde(default)]
    pub disabled_detail: Option<String>,
    #[serde(default)]
    pub filters: Option<ConnectionFilters>,
    #[serde(default)]
    pub rate_limits: Option<Vec<ConnectionRateLimit>>,
    #[serde(default)]
    pub mentions: Option<serde_json::Value>,
    #[serde(default)]
    pub custom_placeholders: Vec<serde_json::Value>,
    #[serde(default)]
    pub split_options: Option<SplitOptions>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: DiscordConnectionDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFilters {
    pub expression: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRateLimit {
    #[serde(default)]
    pub id: Option<String>,
    pub time_window_seconds: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOptions {
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub split_char: Option<String>,
    #[serde(default)]
    pub append_char: Option<String>,
    #[serde(default)]
    pub prepend_char: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConnectionDetails {
    #[serde(default)]
    pub channel: Option<ChannelTarget>,
    #[serde(default)]
    pub webhook: Option<WebhookTarget>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub embeds: Vec<StoredEmbed>,
    #[serde(default)]
    pub component_rows: Vec<StoredComponentRow>,
    #[serde(default)]
    pub components_v2: Option<serde_json::Value>,
    #[serde(default)]
    pub forum_thread_title: Option<String>,
    #[serde(default)]
    pub forum_thread_tags: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub channel_new_thread_title: Option<String>,
    #[serde(default)]
    pub channel_new_thread_excludes_preview: Option<bool>,
    #[serde(default)]
    pub formatter: Option<FormatterOptions>,
    #[serde(default)]
    pub placeholder_limits: Option<serde_json::Value>,
    #[serde(default)]
    pub enable_placeholder_fallback: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTarget {
    pub id: String,
    #[serde(default, rename = "type")]
    pub channel_type: Option<String>,
    pub guild_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTarget {
    pub id: String,
    pub token: String,
    pub guild_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default, rename = "type")]
    pub webhook_type: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatterOptions {
    #[serde(default)]
    pub format_tables: Option<bool>,
    #[serde(default)]
    pub strip_images: Option<bool>,
    #[serde(default)]
    pub disable_image_link_previews: Option<bool>,
    #[serde(default)]
    pub ignore_new_lines: Option<bool>,
}

/// Embed as stored on a connection (flat, string colors).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEmbed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub fields: Vec<StoredEmbedField>,
    #[serde(default)]
    pub footer_text: Option<String>,
    #[serde(default, rename = "footerIconURL")]
    pub footer_icon_url: Option<String>,
    #[serde(default, rename = "thumbnailURL")]
    pub thumbnail_url: Option<String>,
    #[serde(default, rename = "imageURL")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default, rename = "authorURL")]
    pub author_url: Option<String>,
    #[serde(default, rename = "authorIconURL")]
    pub author_icon_url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredComponentRow {
    pub id: String,
    #[serde(default)]
    pub components: Vec<StoredButton>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredButton {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub url: Option<String>,
    pub style: u8,
}

/// Display preferences of a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub date_timezone: Option<String>,
    #[serde(default)]
    pub date_locale: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalCredentialType {
    Reddit,
    #[serde(other)]
    Other,
}

/// A third-party credential linked by a user. Secrets are stored encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCredential {
    #[serde(rename = "type")]
    pub credential_type: ExternalCredentialType,
    #[serde(default)]
    pub data: ExternalCredentialData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCredentialData {
    /// Encrypted access token
    #[serde(default)]
    pub access_token: Option<String>,
}

/// The owner of a feed as needed for delivery and request resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOwner {
    pub discord_user_id: String,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub external_credentials: Vec<ExternalCredential>,
}

/// A deliverable feed joined with its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForDelivery {
    pub feed: Feed,
    pub owner: Option<FeedOwner>,
}

/// Benefits a user is entitled to, as reported by the entitlements provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBenefits {
    pub discord_user_id: String,
    pub is_supporter: bool,
    pub max_user_feeds: u32,
    pub max_daily_articles: u32,
    pub refresh_rate_seconds: u32,
    #[serde(default)]
    pub allow_custom_placeholders: bool,
    #[serde(default)]
    pub allow_external_properties: bool,
}
