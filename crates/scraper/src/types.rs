//! Data returned by the scraping backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Post typename the backend uses for single-video posts (reels).
pub const VIDEO_TYPENAME: &str = "GraphVideo";

/// Post typename for carousels.
pub const SIDECAR_TYPENAME: &str = "GraphSidecar";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub userid: u64,
    /// Number of posts (media count)
    pub posts: u64,
    pub followers: u64,
    pub following: u64,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_verified: bool,
}

/// One media item of a post. Carousels have several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Media {
    Image { image_url: String },
    Video { video_url: String, thumbnail: String },
}

impl Media {
    /// URL of the still image shown for this item.
    pub fn display_url(&self) -> &str {
        match self {
            Media::Image { image_url } => image_url,
            Media::Video { thumbnail, .. } => thumbnail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub username: String,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub owner: Option<String>,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub shortcode: String,
    /// Backend typename: GraphImage, GraphVideo, GraphSidecar
    pub typename: String,
    pub likes: u64,
    pub comments: u64,
    #[serde(default)]
    pub video_view_count: Option<u64>,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub media: Vec<Media>,
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub caption: Option<String>,
    pub owner: Owner,
    #[serde(default)]
    pub top_comments: Vec<Comment>,
}

impl Post {
    pub fn is_sidecar(&self) -> bool {
        self.typename == SIDECAR_TYPENAME
    }
}

/// Entry of a profile's post listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub shortcode: String,
    pub typename: String,
}

impl PostSummary {
    pub fn is_video(&self) -> bool {
        self.typename == VIDEO_TYPENAME
    }
}
