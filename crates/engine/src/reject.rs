//! Wire reject codes reported by the delivery service and their disable codes.

use std::str::FromStr;

use feedpulse_common::error::AppError;
use feedpulse_common::types::{ConnectionDisabledCode, FeedDisabledCode};

/// Why a single article could not be delivered through a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleRejectCode {
    BadRequest,
    Forbidden,
    MediumNotFound,
}

impl ArticleRejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleRejectCode::BadRequest => "user-feeds/bad-request",
            ArticleRejectCode::Forbidden => "user-feeds/forbidden",
            ArticleRejectCode::MediumNotFound => "user-feeds/medium-not-found",
        }
    }

    pub fn connection_disabled_code(self) -> ConnectionDisabledCode {
        match self {
            ArticleRejectCode::BadRequest => ConnectionDisabledCode::BadFormat,
            ArticleRejectCode::Forbidden => ConnectionDisabledCode::MissingPermissions,
            ArticleRejectCode::MediumNotFound => ConnectionDisabledCode::MissingMedium,
        }
    }
}

impl FromStr for ArticleRejectCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user-feeds/bad-request" => Ok(ArticleRejectCode::BadRequest),
            "user-feeds/forbidden" => Ok(ArticleRejectCode::Forbidden),
            "user-feeds/medium-not-found" => Ok(ArticleRejectCode::MediumNotFound),
            other => Err(AppError::UnmappedRejectCode(other.to_string())),
        }
    }
}

/// Why a whole feed was refused by the delivery service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedRejectCode {
    TooLarge,
    InvalidFeed,
}

impl FeedRejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedRejectCode::TooLarge => "user-feeds/feed-too-large",
            FeedRejectCode::InvalidFeed => "user-feeds/invalid-feed",
        }
    }

    pub fn feed_disabled_code(self) -> FeedDisabledCode {
        match self {
            FeedRejectCode::TooLarge => FeedDisabledCode::FeedTooLarge,
            FeedRejectCode::InvalidFeed => FeedDisabledCode::InvalidFeed,
        }
    }
}

impl FromStr for FeedRejectCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user-feeds/feed-too-large" => Ok(FeedRejectCode::TooLarge),
            "user-feeds/invalid-feed" => Ok(FeedRejectCode::InvalidFeed),
            other => Err(AppError::UnmappedRejectCode(other.to_string())),
        }
    }
}
