//! The `feed.deliver-articles` payload.

use serde::Serialize;
use uuid::Uuid;

use feedpulse_common::types::{
    ChannelTarget, ConnectionFilters, ConnectionRateLimit, DiscordConnection, Feed,
    FeedFormatOptions, FeedOwner, SplitOptions,
};

use crate::lookup::RequestLookupDetails;
use crate::medium::{self, MediumActionRow, MediumEmbed};

const DISCORD_MEDIUM_KEY: &str = "discord";

/// Per-feed switches decided before the payload is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub max_daily_articles: u32,
    pub allow_custom_placeholders: bool,
    pub allow_external_properties: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverArticlesPayload {
    pub article_day_limit: u32,
    pub feed: DeliveryFeed,
    pub mediums: Vec<DiscordMedium>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFeed {
    pub id: Uuid,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_lookup_details: Option<RequestLookupDetails>,
    pub passing_comparisons: Vec<String>,
    pub blocking_comparisons: Vec<String>,
    pub format_options: FeedFormatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_properties: Option<Vec<serde_json::Value>>,
    pub date_checks: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordMedium {
    pub id: Uuid,
    pub key: &'static str,
    pub filters: Option<ConnectionFilters>,
    pub rate_limits: Option<Vec<ConnectionRateLimit>>,
    pub details: DiscordMediumDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordMediumDetails {
    pub guild_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<MediumWebhook>,
    pub content: Option<String>,
    pub embeds: Vec<MediumEmbed>,
    pub components: Vec<MediumActionRow>,
    pub components_v2: Option<serde_json::Value>,
    pub forum_thread_title: Option<String>,
    pub forum_thread_tags: Option<Vec<serde_json::Value>>,
    pub channel_new_thread_title: Option<String>,
    pub channel_new_thread_excludes_preview: Option<bool>,
    pub mentions: Option<serde_json::Value>,
    pub custom_placeholders: Vec<serde_json::Value>,
    pub formatter: MediumFormatter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_options: Option<SplitOptions>,
    pub placeholder_limits: Option<serde_json::Value>,
    pub enable_placeholder_fallback: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumWebhook {
    pub id: String,
    pub token: String,
    pub name: Option<String>,
    pub icon_url: Option<String>,
    #[serde(rename = "type")]
    pub webhook_type: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumFormatter {
    pub format_tables: Option<bool>,
    pub strip_images: Option<bool>,
    pub disable_image_link_previews: Option<bool>,
    pub ignore_new_lines: Option<bool>,
    pub connection_created_at: Option<String>,
}

/// Build the delivery payload of one feed. Disabled connections are left out.
pub fn build_deliver_articles_payload(
    feed: &Feed,
    owner: Option<&FeedOwner>,
    options: DeliveryOptions,
    request_lookup_details: Option<RequestLookupDetails>,
) -> DeliverArticlesPayload {
    let mediums = feed
        .connections
        .iter()
        .filter(|(_, connection)| connection.disabled_code.is_none())
        .map(|(_, connection)| discord_medium(connection, options.allow_custom_placeholders))
        .collect();

    let preferences = owner.map(|o| &o.preferences);
    let feed_format = feed.format_options.clone().unwrap_or_default();

    DeliverArticlesPayload {
        article_day_limit: options.max_daily_articles,
        feed: DeliveryFeed {
            id: feed.id,
            url: feed.url.clone(),
            request_lookup_details,
            passing_comparisons: feed.passing_comparisons.clone(),
            blocking_comparisons: feed.blocking_comparisons.clone(),
            format_options: FeedFormatOptions {
                date_format: first_set(
                    feed_format.date_format,
                    preferences.and_then(|p| p.date_format.clone()),
                ),
                date_timezone: first_set(
                    feed_format.date_timezone,
                    preferences.and_then(|p| p.date_timezone.clone()),
                ),
                date_locale: first_set(
                    feed_format.date_locale,
                    preferences.and_then(|p| p.date_locale.clone()),
                ),
            },
            external_properties: options
                .allow_external_properties
                .then(|| feed.external_properties.clone()),
            date_checks: feed.date_check_options.clone(),
        },
        mediums,
    }
}

fn discord_medium(connection: &DiscordConnection, allow_custom_placeholders: bool) -> DiscordMedium {
    let details = &connection.details;
    let formatter = details.formatter.clone().unwrap_or_default();

    DiscordMedium {
        id: connection.id,
        key: DISCORD_MEDIUM_KEY,
        filters: connection
            .filters
            .as_ref()
            .filter(|f| f.expression.is_some())
            .cloned(),
        rate_limits: connection.rate_limits.clone(),
        details: DiscordMediumDetails {
            guild_id: details
                .channel
                .as_ref()
                .map(|c| c.guild_id.clone())
                .or_else(|| details.webhook.as_ref().map(|w| w.guild_id.clone())),
            channel: details.channel.clone(),
            webhook: details.webhook.as_ref().map(|w| MediumWebhook {
                id: w.id.clone(),
                token: w.token.clone(),
                name: w.name.clone(),
                icon_url: w.icon_url.clone(),
                webhook_type: w.webhook_type.clone(),
                thread_id: w.thread_id.clone(),
            }),
            content: medium::cast_content(details.content.as_deref()),
            embeds: medium::cast_embeds(&details.embeds),
            components: medium::cast_component_rows(&details.component_rows),
            components_v2: details.components_v2.clone(),
            forum_thread_title: details.forum_thread_title.clone(),
            forum_thread_tags: details.forum_thread_tags.clone(),
            channel_new_thread_title: details.channel_new_thread_title.clone(),
            channel_new_thread_excludes_preview: details.channel_new_thread_excludes_preview,
            mentions: connection.mentions.clone(),
            custom_placeholders: if allow_custom_placeholders {
                connection.custom_placeholders.clone()
            } else {
                Vec::new()
            },
            formatter: MediumFormatter {
                format_tables: formatter.format_tables,
                strip_images: formatter.strip_images,
                disable_image_link_previews: formatter.disable_image_link_previews,
                ignore_new_lines: formatter.ignore_new_lines,
                connection_created_at: connection.created_at.map(|t| t.to_rfc3339()),
            },
            split_options: connection
                .split_options
                .clone()
                .filter(|s| s.is_enabled.unwrap_or(false)),
            placeholder_limits: details.placeholder_limits.clone(),
            enable_placeholder_fallback: details.enable_placeholder_fallback,
        },
    }
}

fn first_set(preferred: Option<String>, fallback: Option<String>) -> Option<String> {
    preferred.filter(|v| !v.is_empty()).or(fallback)
}
