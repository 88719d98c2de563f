use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Value of the `source` field stamped on every published message.
pub const MESSAGE_SOURCE: &str = "feedpulse::schedule-handler";
pub const DELIVERY_MESSAGE_SOURCE: &str = "feedpulse::message-broker-events";

/// Outbound message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub data: T,
    /// Publish time, epoch milliseconds
    pub timestamp: i64,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

impl<T> Envelope<T> {
    pub fn new(data: T, source: &str) -> Self {
        Self {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            source: source.to_string(),
            rate_seconds: None,
            debug: None,
        }
    }

    pub fn with_rate_seconds(mut self, rate_seconds: u32) -> Self {
        self.rate_seconds = Some(rate_seconds);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }
}

/// One URL the fetcher pool should request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlFetchItem {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_key: Option<String>,
    /// Extra request headers resolved for lookup-key feeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub save_to_object_storage: bool,
}

impl UrlFetchItem {
    pub fn for_url(url: impl Into<String>, save_to_object_storage: bool) -> Self {
        Self {
            url: url.into(),
            lookup_key: None,
            headers: None,
            save_to_object_storage,
        }
    }
}
