//! Schedule handler: per-tick batched dispatch of due feeds, plus the
//! lower-frequency maintenance pass that keeps rates, limits and slots in line
//! with user benefits.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::TryStreamExt;

use feedpulse_broker::{BrokerPublisher, UrlFetchItem};
use feedpulse_common::error::AppResult;
use feedpulse_common::types::UserBenefits;

use crate::lookup::RequestLookupResolver;
use crate::ports::{
    ArticleLimitTargets, Entitlements, FeedLimitEnforcer, FeedRepository, LookupKeySync,
    RefreshRateTargets, SlotOffsetUpdate, UserFeedLimit,
};
use crate::slot::{SlotWindow, calculate_current_slot_window, calculate_slot_offset_ms};

/// Maximum number of URLs in one `url.fetch-batch` message.
pub const URL_BATCH_SIZE: usize = 25;

/// Maximum number of slot offsets persisted per write.
pub const SLOT_OFFSET_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub default_refresh_rate_seconds: u32,
    pub default_max_daily_articles: u32,
    /// Rates that are always scheduled, e.g. slower user-selectable rates
    pub extra_refresh_rates_seconds: Vec<u32>,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
    /// Every refresh rate the tick loop should dispatch
    pub refresh_rates: BTreeSet<u32>,
    pub slot_offsets_updated: usize,
    pub refresh_rates_synced: u64,
    pub article_limits_synced: u64,
}

pub struct ScheduleHandler {
    feeds: Arc<dyn FeedRepository>,
    entitlements: Arc<dyn Entitlements>,
    limit_enforcer: Arc<dyn FeedLimitEnforcer>,
    lookup_key_sync: Arc<dyn LookupKeySync>,
    publisher: BrokerPublisher,
    lookup_resolver: RequestLookupResolver,
    settings: ScheduleSettings,
}

impl ScheduleHandler {
    pub fn new(
        feeds: Arc<dyn FeedRepository>,
        entitlements: Arc<dyn Entitlements>,
        limit_enforcer: Arc<dyn FeedLimitEnforcer>,
        lookup_key_sync: Arc<dyn LookupKeySync>,
        publisher: BrokerPublisher,
        lookup_resolver: RequestLookupResolver,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            feeds,
            entitlements,
            limit_enforcer,
            lookup_key_sync,
            publisher,
            lookup_resolver,
            settings,
        }
    }

    /// Dispatch every feed due in the current window of `refresh_rate_seconds`
    /// as `url.fetch-batch` messages. Returns the number of items dispatched.
    pub async fn dispatch_refresh_rate(&self, refresh_rate_seconds: u32) -> AppResult<usize> {
        self.handle_refresh_rate(refresh_rate_seconds, |batch| {
            self.emit_url_request_batch_event(refresh_rate_seconds, batch)
        })
        .await
    }

    /// Collect due feeds of `refresh_rate_seconds` in the current window into
    /// batches and hand each batch to `urls_handler`.
    pub async fn handle_refresh_rate<F, Fut>(
        &self,
        refresh_rate_seconds: u32,
        urls_handler: F,
    ) -> AppResult<usize>
    where
        F: FnMut(Vec<UrlFetchItem>) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let window = calculate_current_slot_window(refresh_rate_seconds);
        self.handle_refresh_rate_in_window(refresh_rate_seconds, window, urls_handler)
            .await
    }

    /// [`Self::handle_refresh_rate`] for an explicit window.
    pub async fn handle_refresh_rate_in_window<F, Fut>(
        &self,
        refresh_rate_seconds: u32,
        window: SlotWindow,
        mut urls_handler: F,
    ) -> AppResult<usize>
    where
        F: FnMut(Vec<UrlFetchItem>) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let debug_urls = self.feeds.find_debug_urls().await?;
        let mut batcher = Batcher::new(URL_BATCH_SIZE);

        let mut urls = self
            .feeds
            .iterate_urls_for_refresh_rate(refresh_rate_seconds, window);
        while let Some(url) = urls.try_next().await? {
            let debug = debug_urls.contains(&url);
            if debug {
                tracing::info!(
                    url = %url,
                    refresh_rate_seconds,
                    "DEBUG {}: dispatching fetch request",
                    url
                );
            }

            if let Some(full) = batcher.push(UrlFetchItem::for_url(url, debug)) {
                urls_handler(full).await?;
            }
        }
        drop(urls);

        let mut lookup_feeds = self
            .feeds
            .iterate_lookup_key_feeds_for_refresh_rate(refresh_rate_seconds, window);
        while let Some(feed) = lookup_feeds.try_next().await? {
            let Some(details) = self.lookup_resolver.resolve(
                &feed.url,
                Some(&feed.lookup_key),
                &feed.external_credentials,
            ) else {
                tracing::debug!(
                    lookup_key = %feed.lookup_key,
                    url = %feed.url,
                    "Skipping lookup key feed without resolvable request details"
                );
                continue;
            };

            if feed.debug {
                tracing::info!(
                    lookup_key = %feed.lookup_key,
                    refresh_rate_seconds,
                    "DEBUG {}: dispatching fetch request",
                    feed.lookup_key
                );
            }

            let item = UrlFetchItem {
                url: details.url,
                lookup_key: Some(details.key),
                headers: Some(details.headers),
                save_to_object_storage: feed.debug,
            };
            if let Some(full) = batcher.push(item) {
                urls_handler(full).await?;
            }
        }
        drop(lookup_feeds);

        if let Some(remainder) = batcher.finish() {
            urls_handler(remainder).await?;
        }

        tracing::debug!(
            refresh_rate_seconds,
            dispatched = batcher.total,
            "Handled refresh rate"
        );
        Ok(batcher.total)
    }

    pub async fn emit_url_request_batch_event(
        &self,
        refresh_rate_seconds: u32,
        batch: Vec<UrlFetchItem>,
    ) -> AppResult<()> {
        self.publisher
            .publish_url_fetch_batch(refresh_rate_seconds, batch)
            .await
    }

    /// Sync rates, limits and slots with current benefits. Sub-step failures
    /// abort the pass and surface to the caller.
    pub async fn run_maintenance_operations(&self) -> AppResult<MaintenanceSummary> {
        let benefits = self.entitlements.get_benefits_of_all_users().await?;
        let refresh_targets = self.refresh_rate_targets(&benefits);
        let article_targets = self.article_limit_targets(&benefits);

        // Slots must be recomputed before the new rates are written, while the
        // mismatched feeds can still be found.
        let slot_offsets_updated = self.recalculate_slot_offsets(&refresh_targets).await?;
        let refresh_rates_synced = self.feeds.sync_refresh_rates(&refresh_targets).await?;
        let article_limits_synced = self.feeds.sync_max_daily_articles(&article_targets).await?;

        self.enforce_limits_for(&benefits).await?;
        self.lookup_key_sync.sync_lookup_keys().await?;

        let refresh_rates = self.refresh_rates_to_schedule(&refresh_targets);

        tracing::info!(
            users = benefits.len(),
            slot_offsets_updated,
            refresh_rates_synced,
            article_limits_synced,
            refresh_rates = ?refresh_rates,
            "Maintenance operations completed"
        );

        Ok(MaintenanceSummary {
            refresh_rates,
            slot_offsets_updated,
            refresh_rates_synced,
            article_limits_synced,
        })
    }

    pub async fn enforce_user_feed_limits(&self) -> AppResult<()> {
        let benefits = self.entitlements.get_benefits_of_all_users().await?;
        self.enforce_limits_for(&benefits).await
    }

    async fn enforce_limits_for(&self, benefits: &[UserBenefits]) -> AppResult<()> {
        let limits = benefits
            .iter()
            .map(|b| UserFeedLimit {
                discord_user_id: b.discord_user_id.clone(),
                max_user_feeds: b.max_user_feeds,
                refresh_rate_seconds: b.refresh_rate_seconds,
            })
            .collect();

        self.limit_enforcer.enforce_all_user_feed_limits(limits).await
    }

    async fn recalculate_slot_offsets(&self, targets: &RefreshRateTargets) -> AppResult<usize> {
        let mut pending: Vec<SlotOffsetUpdate> = Vec::with_capacity(SLOT_OFFSET_BATCH_SIZE);
        let mut updated = 0;

        let mut feeds = self.feeds.iterate_for_refresh_rate_sync(targets);
        while let Some(feed) = feeds.try_next().await? {
            let effective_rate = feed
                .user_refresh_rate_seconds
                .unwrap_or(feed.target_refresh_rate_seconds);

            pending.push(SlotOffsetUpdate {
                id: feed.id,
                slot_offset_ms: calculate_slot_offset_ms(&feed.url, effective_rate),
            });

            if pending.len() >= SLOT_OFFSET_BATCH_SIZE {
                self.feeds.bulk_update_slot_offsets(&pending).await?;
                updated += pending.len();
                pending.clear();
            }
        }

        if !pending.is_empty() {
            self.feeds.bulk_update_slot_offsets(&pending).await?;
            updated += pending.len();
        }

        Ok(updated)
    }

    fn refresh_rate_targets(&self, benefits: &[UserBenefits]) -> RefreshRateTargets {
        RefreshRateTargets {
            by_user: benefits
                .iter()
                .filter(|b| b.is_supporter)
                .map(|b| (b.discord_user_id.clone(), b.refresh_rate_seconds))
                .collect(),
            default_rate_seconds: self.settings.default_refresh_rate_seconds,
        }
    }

    fn article_limit_targets(&self, benefits: &[UserBenefits]) -> ArticleLimitTargets {
        ArticleLimitTargets {
            by_user: benefits
                .iter()
                .filter(|b| b.is_supporter)
                .map(|b| (b.discord_user_id.clone(), b.max_daily_articles))
                .collect(),
            default_max_daily_articles: self.settings.default_max_daily_articles,
        }
    }

    fn refresh_rates_to_schedule(&self, targets: &RefreshRateTargets) -> BTreeSet<u32> {
        let supporter_rates: HashSet<u32> = targets.by_user.values().copied().collect();

        std::iter::once(targets.default_rate_seconds)
            .chain(supporter_rates)
            .chain(self.settings.extra_refresh_rates_seconds.iter().copied())
            .filter(|rate| *rate > 0)
            .collect()
    }
}

/// Accumulates items into fixed-size batches.
struct Batcher<T> {
    size: usize,
    current: Vec<T>,
    total: usize,
}

impl<T> Batcher<T> {
    fn new(size: usize) -> Self {
        Self {
            size,
            current: Vec::with_capacity(size),
            total: 0,
        }
    }

    /// Add an item, returning the batch once it is full.
    fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.current.push(item);
        self.total += 1;
        (self.current.len() >= self.size)
            .then(|| std::mem::replace(&mut self.current, Vec::with_capacity(self.size)))
    }

    /// The non-empty remainder, if any.
    fn finish(&mut self) -> Option<Vec<T>> {
        (!self.current.is_empty()).then(|| std::mem::take(&mut self.current))
    }
}
