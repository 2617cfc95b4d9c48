//! Generation request, poster record and result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::billing::CreditsRemaining;
use crate::error::Error;

/// Style applied when the request names none
pub const DEFAULT_STYLE: &str = "modern";

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 2000;

/// Output format of a poster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizePreset {
    #[default]
    Poster,
    Flyer,
    Social,
    Story,
    Banner,
}

impl SizePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poster => "poster",
            Self::Flyer => "flyer",
            Self::Social => "social",
            Self::Story => "story",
            Self::Banner => "banner",
        }
    }

    /// Pixel dimensions `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Poster | Self::Flyer => (1080, 1528),
            Self::Social => (1080, 1080),
            Self::Story => (1080, 1920),
            Self::Banner => (1200, 628),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown size preset: {0}")]
pub struct UnknownSizePreset(pub String);

impl FromStr for SizePreset {
    type Err = UnknownSizePreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poster" => Ok(Self::Poster),
            "flyer" => Ok(Self::Flyer),
            "social" => Ok(Self::Social),
            "story" => Ok(Self::Story),
            "banner" => Ok(Self::Banner),
            other => Err(UnknownSizePreset(other.to_string())),
        }
    }
}

/// Body of `POST /api/generate`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationRequest {
    pub title: String,
    pub event_type: String,
    pub description: Option<String>,
    pub style: Option<String>,
    pub size: Option<String>,
}

/// A validated generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosterSpec {
    pub title: String,
    pub event_type: String,
    pub description: Option<String>,
    pub style: String,
    pub size: SizePreset,
}

impl GenerationRequest {
    /// Trim and check the request; empty optionals become `None`
    pub fn validate(&self) -> Result<PosterSpec, Error> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(Error::invalid("Title is required"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(Error::invalid(format!(
                "Title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }

        let event_type = self.event_type.trim();
        if event_type.is_empty() {
            return Err(Error::invalid("Event type is required"));
        }

        let description = non_empty(self.description.as_deref());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(Error::invalid(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }

        let size = match non_empty(self.size.as_deref()) {
            Some(size) => size
                .parse::<SizePreset>()
                .map_err(|e| Error::invalid(format!("Invalid size: {}", e.0)))?,
            None => SizePreset::default(),
        };

        Ok(PosterSpec {
            title: title.to_string(),
            event_type: event_type.to_string(),
            description,
            style: non_empty(self.style.as_deref()).unwrap_or_else(|| DEFAULT_STYLE.to_string()),
            size,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Lifecycle of a generation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosterStatus {
    /// Image stored, debit not yet applied
    Pending,
    Completed,
}

impl PosterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for PosterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown poster status: {}", other)),
        }
    }
}

/// Stored metadata for one generated poster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Poster {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub title: String,
    pub event_type: String,
    pub description: Option<String>,
    /// Text sent to the image model
    pub prompt: String,
    pub image_url: String,
    /// Object key; `None` for placeholder images
    pub storage_path: Option<String>,
    pub style: String,
    pub size: SizePreset,
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub status: PosterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response body of a successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub success: bool,
    pub poster_id: String,
    pub image_url: String,
    pub credits_remaining: CreditsRemaining,
}
