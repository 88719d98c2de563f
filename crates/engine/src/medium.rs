//! Casting of stored Discord message content into the delivery service's shapes.

use serde::{Deserialize, Serialize};

use feedpulse_common::types::{StoredComponentRow, StoredEmbed};

const ACTION_ROW_TYPE: u8 = 1;
const BUTTON_TYPE: u8 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    pub fields: Vec<MediumEmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<MediumEmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<MediumEmbedMedia>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<MediumEmbedMedia>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<MediumEmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumEmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumEmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumEmbedMedia {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumEmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumActionRow {
    #[serde(rename = "type")]
    pub row_type: u8,
    pub components: Vec<MediumButton>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumButton {
    #[serde(rename = "type")]
    pub component_type: u8,
    pub style: u8,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Empty content is treated as absent.
pub fn cast_content(content: Option<&str>) -> Option<String> {
    content.filter(|c| !c.is_empty()).map(str::to_string)
}

pub fn cast_embeds(embeds: &[StoredEmbed]) -> Vec<MediumEmbed> {
    embeds.iter().map(cast_embed).collect()
}

fn cast_embed(embed: &StoredEmbed) -> MediumEmbed {
    MediumEmbed {
        title: embed.title.clone(),
        description: embed.description.clone(),
        url: embed.url.clone(),
        color: embed.color.as_deref().and_then(|c| c.trim().parse().ok()),
        fields: embed
            .fields
            .iter()
            .map(|f| MediumEmbedField {
                name: f.name.clone(),
                value: f.value.clone(),
                inline: f.inline,
            })
            .collect(),
        footer: non_empty(&embed.footer_text).map(|text| MediumEmbedFooter {
            text,
            icon_url: non_empty(&embed.footer_icon_url),
        }),
        image: non_empty(&embed.image_url).map(|url| MediumEmbedMedia { url }),
        thumbnail: non_empty(&embed.thumbnail_url).map(|url| MediumEmbedMedia { url }),
        author: non_empty(&embed.author_name).map(|name| MediumEmbedAuthor {
            name,
            url: non_empty(&embed.author_url),
            icon_url: non_empty(&embed.author_icon_url),
        }),
        timestamp: non_empty(&embed.timestamp),
    }
}

pub fn cast_component_rows(rows: &[StoredComponentRow]) -> Vec<MediumActionRow> {
    rows.iter()
        .map(|row| MediumActionRow {
            row_type: ACTION_ROW_TYPE,
            components: row
                .components
                .iter()
                .map(|button| MediumButton {
                    component_type: BUTTON_TYPE,
                    style: button.style,
                    label: button.label.clone(),
                    url: button.url.clone(),
                })
                .collect(),
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}
