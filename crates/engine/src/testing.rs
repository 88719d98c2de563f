//! Test doubles shared by the engine's unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use feedpulse_common::error::AppResult;
use feedpulse_common::events::FeedLookup;
use feedpulse_common::types::{
    ChannelTarget, ConnectionDisabledCode, ConnectionKind, DiscordConnection,
    DiscordConnectionDetails, ExternalCredential, ExternalCredentialData, ExternalCredentialType,
    Feed, FeedConnections, FeedDisabledCode, FeedForDelivery, FeedHealthStatus, FeedOwner,
};

use crate::ports::{
    ArticleLimitTargets, ConnectionDisabledAlert, DueLookupFeed, FeedRepository,
    NotificationSender, RateSyncFeed, RefreshRateTargets, SlotOffsetUpdate,
};
use crate::slot::{SlotWindow, calculate_slot_offset_ms};

pub const TEST_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Encrypt with [`TEST_KEY_HEX`] and a fixed nonce, in the stored credential format.
pub fn encrypt_for_test(plaintext: &str) -> String {
    let cipher = Aes256Gcm::new_from_slice(&hex::decode(TEST_KEY_HEX).unwrap()).unwrap();
    let nonce = [7u8; 12];
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .unwrap();
    format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext))
}

pub fn reddit_credential(token: &str) -> ExternalCredential {
    ExternalCredential {
        credential_type: ExternalCredentialType::Reddit,
        data: ExternalCredentialData {
            access_token: Some(encrypt_for_test(token)),
        },
    }
}

pub fn connection() -> DiscordConnection {
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

/// An enabled, healthy feed with one channel connection and a consistent slot.
pub fn feed(url: &str, refresh_rate_seconds: u32) -> Feed {
    Feed {
        id: Uuid::new_v4(),
        title: "Feed".to_string(),
        url: url.to_string(),
        discord_user_id: "user-1".to_string(),
        refresh_rate_seconds,
        user_refresh_rate_seconds: None,
        slot_offset_ms: calculate_slot_offset_ms(url, refresh_rate_seconds),
        health_status: FeedHealthStatus::Ok,
        disabled_code: None,
        lookup_key: None,
        max_daily_articles: 50,
        debug: false,
        connections: FeedConnections {
            discord_channels: vec![connection()],
            discord_webhooks: vec![],
        },
        passing_comparisons: vec![],
        blocking_comparisons: vec![],
        format_options: None,
        date_check_options: None,
        external_properties: vec![],
        created_at: chrono::Utc::now(),
    }
}

struct FeedRecord {
    feed: Feed,
    owner: Option<FeedOwner>,
}

/// In-memory [`FeedRepository`] with the same filter semantics as the SQL one.
#[derive(Default)]
pub struct InMemoryFeedRepository {
    records: Mutex<Vec<FeedRecord>>,
}

impl InMemoryFeedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, feed: Feed) {
        let owner = FeedOwner {
            discord_user_id: feed.discord_user_id.clone(),
            ..Default::default()
        };
        self.insert_with_owner(feed, Some(owner));
    }

    pub fn insert_with_owner(&self, feed: Feed, owner: Option<FeedOwner>) {
        self.lock().push(FeedRecord { feed, owner });
    }

    pub fn get(&self, id: Uuid) -> Option<Feed> {
        self.lock()
            .iter()
            .find(|r| r.feed.id == id)
            .map(|r| r.feed.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FeedRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn due(feed: &Feed, refresh_rate_seconds: u32, window: &SlotWindow) -> bool {
        !feed.is_disabled()
            && feed.health_status != FeedHealthStatus::Failed
            && !feed.connections.is_empty()
            && feed.effective_refresh_rate_seconds() == refresh_rate_seconds
            && window.contains(feed.slot_offset_ms)
    }

    fn deliverable(feed: &Feed, refresh_rate_seconds: u32) -> bool {
        !feed.is_disabled()
            && feed.effective_refresh_rate_seconds() == refresh_rate_seconds
            && feed
                .connections
                .iter()
                .any(|(_, c)| c.disabled_code.is_none())
    }
}

fn matches(feed: &Feed, lookup: &FeedLookup) -> bool {
    match lookup {
        FeedLookup::Url(url) => feed.lookup_key.is_none() && &feed.url == url,
        FeedLookup::LookupKey(key) => feed.lookup_key.as_deref() == Some(key.as_str()),
    }
}

fn into_stream<'a, T: Send + 'a>(items: Vec<T>) -> BoxStream<'a, AppResult<T>> {
    futures::stream::iter(items.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl FeedRepository for InMemoryFeedRepository {
    fn iterate_urls_for_refresh_rate(
        &self,
        refresh_rate_seconds: u32,
        window: SlotWindow,
    ) -> BoxStream<'_, AppResult<String>> {
        let mut seen = HashSet::new();
        let urls: Vec<String> = self
            .lock()
            .iter()
            .filter(|r| r.feed.lookup_key.is_none())
            .filter(|r| Self::due(&r.feed, refresh_rate_seconds, &window))
            .map(|r| r.feed.url.clone())
            .filter(|url| seen.insert(url.clone()))
            .collect();
        into_stream(urls)
    }

    fn iterate_lookup_key_feeds_for_refresh_rate(
        &self,
        refresh_rate_seconds: u32,
        window: SlotWindow,
    ) -> BoxStream<'_, AppResult<DueLookupFeed>> {
        let mut seen = HashSet::new();
        let feeds: Vec<DueLookupFeed> = self
            .lock()
            .iter()
            .filter(|r| Self::due(&r.feed, refresh_rate_seconds, &window))
            .filter_map(|r| {
                let lookup_key = r.feed.lookup_key.clone()?;
                seen.insert(lookup_key.clone()).then(|| DueLookupFeed {
                    url: r.feed.url.clone(),
                    lookup_key,
                    debug: r.feed.debug,
                    external_credentials: r
                        .owner
                        .as_ref()
                        .map(|o| o.external_credentials.clone())
                        .unwrap_or_default(),
                })
            })
            .collect();
        into_stream(feeds)
    }

    async fn find_debug_urls(&self) -> AppResult<HashSet<String>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.feed.debug)
            .map(|r| r.feed.url.clone())
            .collect())
    }

    fn iterate_for_refresh_rate_sync<'a>(
        &'a self,
        targets: &'a RefreshRateTargets,
    ) -> BoxStream<'a, AppResult<RateSyncFeed>> {
        let feeds: Vec<RateSyncFeed> = self
            .lock()
            .iter()
            .filter_map(|r| {
                let target = targets.target_for(&r.feed.discord_user_id);
                (r.feed.refresh_rate_seconds != target).then(|| RateSyncFeed {
                    id: r.feed.id,
                    url: r.feed.url.clone(),
                    refresh_rate_seconds: r.feed.refresh_rate_seconds,
                    user_refresh_rate_seconds: r.feed.user_refresh_rate_seconds,
                    target_refresh_rate_seconds: target,
                })
            })
            .collect();
        into_stream(feeds)
    }

    async fn bulk_update_slot_offsets(&self, updates: &[SlotOffsetUpdate]) -> AppResult<()> {
        let mut records = self.lock();
        for update in updates {
            if let Some(record) = records.iter_mut().find(|r| r.feed.id == update.id) {
                record.feed.slot_offset_ms = update.slot_offset_ms;
            }
        }
        Ok(())
    }

    async fn sync_refresh_rates(&self, targets: &RefreshRateTargets) -> AppResult<u64> {
        let mut changed = 0;
        for record in self.lock().iter_mut() {
            let target = targets.target_for(&record.feed.discord_user_id);
            if record.feed.refresh_rate_seconds != target {
                record.feed.refresh_rate_seconds = target;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn sync_max_daily_articles(&self, targets: &ArticleLimitTargets) -> AppResult<u64> {
        let mut changed = 0;
        for record in self.lock().iter_mut() {
            let target = targets.target_for(&record.feed.discord_user_id);
            if record.feed.max_daily_articles != target {
                record.feed.max_daily_articles = target;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn update_health_status_by_filter(
        &self,
        lookup: &FeedLookup,
        status: FeedHealthStatus,
    ) -> AppResult<u64> {
        let mut changed = 0;
        for record in self.lock().iter_mut() {
            if matches(&record.feed, lookup) && record.feed.health_status != status {
                record.feed.health_status = status;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count_not_in_health_status(
        &self,
        lookup: &FeedLookup,
        status: FeedHealthStatus,
    ) -> AppResult<u64> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| matches(&r.feed, lookup) && r.feed.health_status != status)
            .count() as u64)
    }

    fn iterate_for_delivery(
        &self,
        url: String,
        refresh_rate_seconds: u32,
    ) -> BoxStream<'_, AppResult<FeedForDelivery>> {
        let lookup = FeedLookup::Url(url);
        let feeds: Vec<FeedForDelivery> = self
            .lock()
            .iter()
            .filter(|r| matches(&r.feed, &lookup) && Self::deliverable(&r.feed, refresh_rate_seconds))
            .map(|r| FeedForDelivery {
                feed: r.feed.clone(),
                owner: r.owner.clone(),
            })
            .collect();
        into_stream(feeds)
    }

    fn iterate_lookup_key_feeds_for_delivery(
        &self,
        lookup_key: String,
        refresh_rate_seconds: u32,
    ) -> BoxStream<'_, AppResult<FeedForDelivery>> {
        let lookup = FeedLookup::LookupKey(lookup_key);
        let feeds: Vec<FeedForDelivery> = self
            .lock()
            .iter()
            .filter(|r| matches(&r.feed, &lookup) && Self::deliverable(&r.feed, refresh_rate_seconds))
            .map(|r| FeedForDelivery {
                feed: r.feed.clone(),
                owner: r.owner.clone(),
            })
            .collect();
        into_stream(feeds)
    }

    async fn disable_by_filter_if_not_disabled(
        &self,
        lookup: &FeedLookup,
        code: FeedDisabledCode,
    ) -> AppResult<u64> {
        let mut changed = 0;
        for record in self.lock().iter_mut() {
            if matches(&record.feed, lookup) && !record.feed.is_disabled() {
                record.feed.disabled_code = Some(code);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_ids_without_disabled_code(&self, lookup: &FeedLookup) -> AppResult<Vec<Uuid>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| matches(&r.feed, lookup) && !r.feed.is_disabled())
            .map(|r| r.feed.id)
            .collect())
    }

    async fn disable_and_set_health_status(
        &self,
        ids: &[Uuid],
        code: FeedDisabledCode,
        status: FeedHealthStatus,
    ) -> AppResult<Vec<Uuid>> {
        let mut changed = Vec::new();
        for record in self.lock().iter_mut() {
            if ids.contains(&record.feed.id) && !record.feed.is_disabled() {
                record.feed.disabled_code = Some(code);
                record.feed.health_status = status;
                changed.push(record.feed.id);
            }
        }
        Ok(changed)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Feed>> {
        Ok(self.get(id))
    }

    async fn disable_by_id_if_not_disabled(&self, id: Uuid, code: FeedDisabledCode) -> AppResult<bool> {
        let mut records = self.lock();
        match records
            .iter_mut()
            .find(|r| r.feed.id == id && !r.feed.is_disabled())
        {
            Some(record) => {
                record.feed.disabled_code = Some(code);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_connection_disabled_code(
        &self,
        feed_id: Uuid,
        kind: ConnectionKind,
        index: usize,
        code: ConnectionDisabledCode,
        detail: Option<&str>,
    ) -> AppResult<bool> {
        let mut records = self.lock();
        if let Some(record) = records.iter_mut().find(|r| r.feed.id == feed_id)
            && let Some(connection) = record.feed.connections.get_mut(kind).get_mut(index)
            && connection.disabled_code.is_none()
        {
            connection.disabled_code = Some(code);
            connection.disabled_detail = detail.map(str::to_string);
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentNotification {
    DisabledFeeds(Vec<Uuid>, FeedDisabledCode),
    DisabledConnection(ConnectionDisabledAlert),
}

/// Forwards every notification to a channel so tests can await spawned sends.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<SentNotification>,
}

impl RecordingNotifier {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SentNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_disabled_feeds_alert(
        &self,
        feed_ids: Vec<Uuid>,
        code: FeedDisabledCode,
    ) -> AppResult<()> {
        let _ = self.tx.send(SentNotification::DisabledFeeds(feed_ids, code));
        Ok(())
    }

    async fn send_disabled_connection_alert(&self, alert: ConnectionDisabledAlert) -> AppResult<()> {
        let _ = self.tx.send(SentNotification::DisabledConnection(alert));
        Ok(())
    }
}

pub async fn next_notification(
    rx: &mut mpsc::UnboundedReceiver<SentNotification>,
) -> SentNotification {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("notification was not sent in time")
        .expect("notifier dropped")
}

pub async fn assert_no_notification(rx: &mut mpsc::UnboundedReceiver<SentNotification>) {
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err(), "unexpected notification");
}
