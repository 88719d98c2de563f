//! Payloads of the events consumed from the broker.
//!
//! Every inbound message is wrapped as `{"data": <event>}`; see [`InboundMessage`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound broker message wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage<T> {
    pub data: T,
}

/// Selects the feeds an event applies to. A lookup key takes precedence over the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedLookup {
    Url(String),
    LookupKey(String),
}

impl FeedLookup {
    pub fn from_parts(url: &str, lookup_key: Option<&str>) -> Self {
        match lookup_key {
            Some(key) if !key.is_empty() => FeedLookup::LookupKey(key.to_string()),
            _ => FeedLookup::Url(url.to_string()),
        }
    }
}

impl std::fmt::Display for FeedLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedLookup::Url(url) => write!(f, "{url}"),
            FeedLookup::LookupKey(key) => write!(f, "{key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSupporterRolesEvent {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlFailingEvent {
    pub url: String,
    #[serde(default)]
    pub lookup_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlFetchCompletedEvent {
    pub url: String,
    #[serde(default)]
    pub lookup_key: Option<String>,
    pub rate_seconds: u32,
    #[serde(default)]
    pub debug: bool,
}

/// Fetch statuses carried by `url.rejected.disable-feeds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchRejectStatus {
    #[serde(rename = "REFUSED_LARGE_FEED")]
    RefusedLargeFeed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRejectedDisableFeedsEvent {
    pub url: String,
    #[serde(default)]
    pub lookup_key: Option<String>,
    pub status: FetchRejectStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlFailedDisableFeedsEvent {
    pub url: String,
    #[serde(default)]
    pub lookup_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRejectedDisableFeedEvent {
    /// Wire reject code, e.g. `user-feeds/feed-too-large`
    pub rejected_code: String,
    pub feed: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRejectedArticleDisableConnectionEvent {
    /// Wire reject code, e.g. `user-feeds/forbidden`
    pub rejected_code: String,
    #[serde(default)]
    pub rejected_message: Option<String>,
    #[serde(default)]
    pub article_id: Option<String>,
    /// The connection the article was rejected for
    pub medium: EntityRef,
    pub feed: EntityRef,
}

macro_rules! impl_feed_lookup {
    ($($event:ty),* $(,)?) => {
        $(
            impl $event {
                pub fn feed_lookup(&self) -> FeedLookup {
                    FeedLookup::from_parts(&self.url, self.lookup_key.as_deref())
                }
            }
        )*
    };
}

impl_feed_lookup!(
    UrlFailingEvent,
    UrlFetchCompletedEvent,
    UrlRejectedDisableFeedsEvent,
    UrlFailedDisableFeedsEvent,
);
