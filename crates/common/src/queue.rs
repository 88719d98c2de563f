use std::str::FromStr;

use crate::error::AppError;

/// Broker queues the system publishes to or consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageBrokerQueue {
    SyncSupporterDiscordRoles,
    UrlFailing,
    UrlFetchCompleted,
    UrlRejectedDisableFeeds,
    UrlFailedDisableFeeds,
    FeedRejectedDisableFeed,
    FeedRejectedArticleDisableConnection,
    UrlFetchBatch,
    FeedDeliverArticles,
}

impl MessageBrokerQueue {
    /// Queues carrying fetch-result and supporter events into the worker.
    pub const INBOUND: [MessageBrokerQueue; 7] = [
        MessageBrokerQueue::SyncSupporterDiscordRoles,
        MessageBrokerQueue::UrlFailing,
        MessageBrokerQueue::UrlFetchCompleted,
        MessageBrokerQueue::UrlRejectedDisableFeeds,
        MessageBrokerQueue::UrlFailedDisableFeeds,
        MessageBrokerQueue::FeedRejectedDisableFeed,
        MessageBrokerQueue::FeedRejectedArticleDisableConnection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageBrokerQueue::SyncSupporterDiscordRoles => "sync-supporter-discord-roles",
            MessageBrokerQueue::UrlFailing => "url.failing",
            MessageBrokerQueue::UrlFetchCompleted => "url.fetch.completed",
            MessageBrokerQueue::UrlRejectedDisableFeeds => "url.rejected.disable-feeds",
            MessageBrokerQueue::UrlFailedDisableFeeds => "url.failed.disable-feeds",
            MessageBrokerQueue::FeedRejectedDisableFeed => "feed.rejected.disable-feed",
            MessageBrokerQueue::FeedRejectedArticleDisableConnection => {
                "feed.rejected-article.disable-connection"
            }
            MessageBrokerQueue::UrlFetchBatch => "url.fetch-batch",
            MessageBrokerQueue::FeedDeliverArticles => "feed.deliver-articles",
        }
    }
}

impl std::fmt::Display for MessageBrokerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageBrokerQueue {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageBrokerQueue::INBOUND
            .into_iter()
            .chain([
                MessageBrokerQueue::UrlFetchBatch,
                MessageBrokerQueue::FeedDeliverArticles,
            ])
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| AppError::NotFound(format!("queue '{s}'")))
    }
}
