//! Fetch-result event handling.
//!
//! The only writer of feed health and disable state. Every transition is a
//! filter-qualified update, so duplicate or reordered events converge on the
//! same state and notify at most once per transition.

use std::future::Future;
use std::sync::Arc;

use futures::TryStreamExt;
use serde::de::DeserializeOwned;

use feedpulse_broker::BrokerPublisher;
use feedpulse_common::error::{AppError, AppResult};
use feedpulse_common::events::{
    FeedRejectedArticleDisableConnectionEvent, FeedRejectedDisableFeedEvent, FetchRejectStatus,
    InboundMessage, SyncSupporterRolesEvent, UrlFailedDisableFeedsEvent, UrlFailingEvent,
    UrlFetchCompletedEvent, UrlRejectedDisableFeedsEvent,
};
use feedpulse_common::queue::MessageBrokerQueue;
use feedpulse_common::types::{FeedDisabledCode, FeedForDelivery, FeedHealthStatus};

use crate::delivery::{DeliveryOptions, build_deliver_articles_payload};
use crate::lookup::RequestLookupResolver;
use crate::ports::{ConnectionDisabledAlert, Entitlements, FeedRepository, NotificationSender};
use crate::reject::{ArticleRejectCode, FeedRejectCode};

pub struct MessageBrokerEventsService {
    feeds: Arc<dyn FeedRepository>,
    entitlements: Arc<dyn Entitlements>,
    notifications: Arc<dyn NotificationSender>,
    publisher: BrokerPublisher,
    lookup_resolver: RequestLookupResolver,
}

impl MessageBrokerEventsService {
    pub fn new(
        feeds: Arc<dyn FeedRepository>,
        entitlements: Arc<dyn Entitlements>,
        notifications: Arc<dyn NotificationSender>,
        publisher: BrokerPublisher,
        lookup_resolver: RequestLookupResolver,
    ) -> Self {
        Self {
            feeds,
            entitlements,
            notifications,
            publisher,
            lookup_resolver,
        }
    }

    /// Route a raw `{data: ...}` message from an inbound queue to its handler.
    pub async fn handle_queue_message(
        &self,
        queue: MessageBrokerQueue,
        body: serde_json::Value,
    ) -> AppResult<()> {
        match queue {
            MessageBrokerQueue::SyncSupporterDiscordRoles => {
                self.handle_sync_supporter_discord_roles(&parse(body)?).await
            }
            MessageBrokerQueue::UrlFailing => self.handle_url_failing(&parse(body)?).await,
            MessageBrokerQueue::UrlFetchCompleted => self
                .handle_url_fetch_completed(&parse(body)?)
                .await
                .map(|_| ()),
            MessageBrokerQueue::UrlRejectedDisableFeeds => {
                self.handle_url_rejected_disable_feeds(&parse(body)?).await
            }
            MessageBrokerQueue::UrlFailedDisableFeeds => {
                self.handle_url_failed_disable_feeds(&parse(body)?).await
            }
            MessageBrokerQueue::FeedRejectedDisableFeed => {
                self.handle_feed_rejected_disable_feed(&parse(body)?).await
            }
            MessageBrokerQueue::FeedRejectedArticleDisableConnection => {
                self.handle_rejected_article_disable_connection(&parse(body)?)
                    .await
            }
            MessageBrokerQueue::UrlFetchBatch | MessageBrokerQueue::FeedDeliverArticles => Err(
                AppError::Internal(format!("queue {queue} is not consumed by the events service")),
            ),
        }
    }

    pub async fn handle_sync_supporter_discord_roles(
        &self,
        event: &SyncSupporterRolesEvent,
    ) -> AppResult<()> {
        tracing::info!(user_id = %event.user_id, "Syncing supporter discord roles");
        self.entitlements
            .sync_discord_supporter_roles(&event.user_id)
            .await
    }

    pub async fn handle_url_failing(&self, event: &UrlFailingEvent) -> AppResult<()> {
        let lookup = event.feed_lookup();
        let updated = self
            .feeds
            .update_health_status_by_filter(&lookup, FeedHealthStatus::Failing)
            .await?;

        tracing::debug!(lookup = %lookup, updated, "Marked feeds as failing");
        Ok(())
    }

    /// Restore health and emit one delivery instruction per deliverable feed.
    /// Returns the number of instructions emitted.
    pub async fn handle_url_fetch_completed(
        &self,
        event: &UrlFetchCompletedEvent,
    ) -> AppResult<usize> {
        let lookup = event.feed_lookup();

        if event.debug {
            tracing::info!(
                lookup = %lookup,
                rate_seconds = event.rate_seconds,
                "DEBUG {}: in url fetch completed",
                lookup
            );
        }

        let unhealthy = self
            .feeds
            .count_not_in_health_status(&lookup, FeedHealthStatus::Ok)
            .await?;
        if unhealthy > 0 {
            self.feeds
                .update_health_status_by_filter(&lookup, FeedHealthStatus::Ok)
                .await?;
        }

        let mut feeds = match &event.lookup_key {
            Some(key) if !key.is_empty() => self
                .feeds
                .iterate_lookup_key_feeds_for_delivery(key.clone(), event.rate_seconds),
            _ => self
                .feeds
                .iterate_for_delivery(event.url.clone(), event.rate_seconds),
        };

        let mut emitted = 0;
        while let Some(feed) = feeds.try_next().await? {
            let feed_id = feed.feed.id;
            if feed.feed.debug {
                tracing::info!(feed_id = %feed_id, "DEBUG {}: handling url fetch completed", feed_id);
            }

            match self.deliver_feed(&feed).await {
                Ok(()) => emitted += 1,
                Err(e) => {
                    tracing::error!(
                        feed_id = %feed_id,
                        error = %e,
                        "Failed to emit deliver feed articles event"
                    );
                }
            }
        }

        Ok(emitted)
    }

    async fn deliver_feed(&self, delivery: &FeedForDelivery) -> AppResult<()> {
        let feed = &delivery.feed;
        let mut options = DeliveryOptions {
            max_daily_articles: feed.max_daily_articles,
            ..Default::default()
        };

        if feed.has_custom_placeholders() || feed.has_external_properties() {
            let benefits = self
                .entitlements
                .get_benefits_of_user(&feed.discord_user_id)
                .await?;
            options.allow_custom_placeholders = benefits.allow_custom_placeholders;
            options.allow_external_properties = benefits.allow_external_properties;
        }

        self.emit_deliver_feed_articles_event(delivery, options)
            .await
    }

    /// Publish the `feed.deliver-articles` instruction of one feed.
    pub async fn emit_deliver_feed_articles_event(
        &self,
        delivery: &FeedForDelivery,
        options: DeliveryOptions,
    ) -> AppResult<()> {
        let feed = &delivery.feed;
        let owner = delivery.owner.as_ref();

        let request_lookup_details = self.lookup_resolver.resolve(
            &feed.url,
            feed.lookup_key.as_deref(),
            owner
                .map(|o| o.external_credentials.as_slice())
                .unwrap_or_default(),
        );

        let payload = build_deliver_articles_payload(feed, owner, options, request_lookup_details);

        if feed.debug {
            tracing::info!(
                feed_id = %feed.id,
                mediums = payload.mediums.len(),
                "DEBUG {}: emitting deliver articles event",
                feed.id
            );
        }

        self.publisher
            .publish_deliver_feed_articles(&payload, feed.debug)
            .await?;

        tracing::debug!(feed_id = %feed.id, "Emitted deliver feed articles event");
        Ok(())
    }

    pub async fn handle_url_rejected_disable_feeds(
        &self,
        event: &UrlRejectedDisableFeedsEvent,
    ) -> AppResult<()> {
        let lookup = event.feed_lookup();

        match event.status {
            FetchRejectStatus::RefusedLargeFeed => {
                let disabled = self
                    .feeds
                    .disable_by_filter_if_not_disabled(&lookup, FeedDisabledCode::FeedTooLarge)
                    .await?;
                tracing::info!(lookup = %lookup, disabled, "Disabled feeds refused as too large");
            }
            FetchRejectStatus::Other => {
                tracing::debug!(lookup = %lookup, "Ignoring url rejection with unhandled status");
            }
        }

        Ok(())
    }

    pub async fn handle_url_failed_disable_feeds(
        &self,
        event: &UrlFailedDisableFeedsEvent,
    ) -> AppResult<()> {
        let lookup = event.feed_lookup();
        let candidates = self.feeds.find_ids_without_disabled_code(&lookup).await?;
        if candidates.is_empty() {
            return Ok(());
        }

        let disabled = self
            .feeds
            .disable_and_set_health_status(
                &candidates,
                FeedDisabledCode::FailedRequests,
                FeedHealthStatus::Failed,
            )
            .await?;
        if disabled.is_empty() {
            return Ok(());
        }

        tracing::info!(lookup = %lookup, count = disabled.len(), "Disabled feeds after failed requests");

        let notifications = Arc::clone(&self.notifications);
        spawn_notification("disabled feeds alert", async move {
            notifications
                .send_disabled_feeds_alert(disabled, FeedDisabledCode::FailedRequests)
                .await
        });

        Ok(())
    }

    pub async fn handle_feed_rejected_disable_feed(
        &self,
        event: &FeedRejectedDisableFeedEvent,
    ) -> AppResult<()> {
        let feed_id = event.feed.id;
        let Some(feed) = self.feeds.find_by_id(feed_id).await? else {
            tracing::warn!(
                feed_id = %feed_id,
                queue = %MessageBrokerQueue::FeedRejectedDisableFeed,
                "No feed found for rejected feed event"
            );
            return Ok(());
        };

        let code = event
            .rejected_code
            .parse::<FeedRejectCode>()?
            .feed_disabled_code();

        if !self.feeds.disable_by_id_if_not_disabled(feed.id, code).await? {
            return Ok(());
        }

        tracing::info!(feed_id = %feed.id, code = %code, "Sending disabled feed alert");

        let notifications = Arc::clone(&self.notifications);
        spawn_notification("disabled feeds alert", async move {
            notifications
                .send_disabled_feeds_alert(vec![feed.id], code)
                .await
        });

        Ok(())
    }

    pub async fn handle_rejected_article_disable_connection(
        &self,
        event: &FeedRejectedArticleDisableConnectionEvent,
    ) -> AppResult<()> {
        let feed_id = event.feed.id;
        let Some(feed) = self.feeds.find_by_id(feed_id).await? else {
            tracing::warn!(
                feed_id = %feed_id,
                queue = %MessageBrokerQueue::FeedRejectedArticleDisableConnection,
                "No feed found for rejected article event"
            );
            return Ok(());
        };

        let code = event
            .rejected_code
            .parse::<ArticleRejectCode>()?
            .connection_disabled_code();

        let Some((kind, index, connection)) = feed.connections.find(event.medium.id) else {
            tracing::debug!(
                feed_id = %feed_id,
                connection_id = %event.medium.id,
                "Rejected article references an unknown connection"
            );
            return Ok(());
        };

        if let Some(existing) = connection.disabled_code {
            tracing::debug!(
                feed_id = %feed.id,
                connection_id = %connection.id,
                code = %existing,
                "Connection already disabled"
            );
            return Ok(());
        }

        let disabled = self
            .feeds
            .set_connection_disabled_code(
                feed.id,
                kind,
                index,
                code,
                event.rejected_message.as_deref(),
            )
            .await?;

        if !disabled {
            return Ok(());
        }

        tracing::info!(
            feed_id = %feed.id,
            connection_id = %connection.id,
            code = %code,
            "Sending disabled connection alert"
        );

        let alert = ConnectionDisabledAlert {
            feed_id: feed.id,
            feed_title: feed.title.clone(),
            discord_user_id: feed.discord_user_id.clone(),
            connection_id: connection.id,
            connection_name: connection.name.clone(),
            connection_kind: kind,
            disabled_code: code,
            article_id: event.article_id.clone(),
            rejected_message: event.rejected_message.clone(),
        };
        let notifications = Arc::clone(&self.notifications);
        spawn_notification("disabled connection alert", async move {
            notifications.send_disabled_connection_alert(alert).await
        });

        Ok(())
    }
}

fn parse<T: DeserializeOwned>(body: serde_json::Value) -> AppResult<T> {
    let message: InboundMessage<T> = serde_json::from_value(body)?;
    Ok(message.data)
}

/// Send a notification without blocking or failing the transition that caused it.
fn spawn_notification<F>(kind: &'static str, send: F)
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = send.await {
            tracing::error!(error = %e, "Failed to send {}", kind);
        }
    });
}
