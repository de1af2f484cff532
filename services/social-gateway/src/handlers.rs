//! Lookup endpoints
//!
//! Each handler validates its query, runs the backend call through the
//! failover executor, and shapes the result as JSON. Errors are answered as
//! `{"error": "..."}` (see `ApiError`).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use chrono::SecondsFormat;
use scraper::{
    Classify, ErrorClassification, Post, PostSummary, Profile, ScrapeError, ScraperClient,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::error::ApiError;

const POST_BASE_URL: &str = "https://www.instagram.com";
const DEFAULT_TOP_COMMENTS: usize = 3;
const DEFAULT_IMG_INDEX: usize = 1;
const DEFAULT_LINK_COUNT: usize = 5;

type Params = HashMap<String, String>;

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Record metrics for a finished request and turn it into a response.
fn finish<T: Serialize>(
    route: &'static str,
    started: Instant,
    result: Result<Json<T>, ApiError>,
) -> Response {
    let response = match result {
        Ok(body) => body.into_response(),
        Err(e) => {
            warn!(route, status = e.status().as_u16(), error = %e, "lookup failed");
            e.into_response()
        }
    };
    crate::metrics::record_request(
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

fn required<'a>(params: &'a Params, name: &str, message: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(message.to_string()))
}

fn optional_number<T: FromStr>(params: &Params, name: &str, default: T) -> Result<T, ApiError> {
    match params.get(name).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("{name} must be a non-negative integer"))),
    }
}

/// Shortcode of a post URL: the last path segment, ignoring query, fragment
/// and trailing slashes.
pub fn shortcode_from_url(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end]
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}

/// Username from an operator parameter, which may be a bare username or a
/// profile URL.
pub fn operator_username(operator: &str) -> Option<&str> {
    if !operator.contains('/') {
        return Some(operator);
    }
    let end = operator.find(['?', '#']).unwrap_or(operator.len());
    operator[..end].split('/').rev().find(|s| !s.is_empty())
}

/// Public URL of a post: reels for videos, `/p/` for everything else.
pub fn post_link(summary: &PostSummary) -> String {
    let kind = if summary.is_video() { "reel" } else { "p" };
    format!("{POST_BASE_URL}/{kind}/{}/", summary.shortcode)
}

/// Response body for a post. `img_index` is 1-based and selects the cover
/// image of a carousel.
pub fn post_body(post: &Post, img_index: usize, top_comments: usize) -> Result<Value, ApiError> {
    let cover = if post.is_sidecar() {
        let item = img_index
            .checked_sub(1)
            .and_then(|i| post.media.get(i))
            .ok_or_else(|| ApiError::BadRequest("Image index out of range".into()))?;
        Some(item.display_url())
    } else {
        post.media.first().map(|m| m.display_url())
    };

    let comments: Vec<_> = post.top_comments.iter().take(top_comments).collect();
    let views = if post.is_video {
        post.video_view_count
    } else {
        None
    };

    Ok(serde_json::json!({
        "likes": post.likes,
        "comments_count": post.comments,
        "views": views,
        "media": post.media,
        "cover_image_url": cover,
        "date": post.taken_at.format("%d.%m.%Y").to_string(),
        "time": post.taken_at.format("%H:%M:%S").to_string(),
        "datetime": post.taken_at.to_rfc3339_opts(SecondsFormat::Secs, false),
        "description": post.caption.clone().unwrap_or_default(),
        "post_type": post.typename,
        "owner": post.owner,
        "top_comments": comments,
    }))
}

/// Failure of the post listing lookup.
#[derive(Debug, thiserror::Error)]
enum LinksError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    /// An account that cannot see the profile gets an empty feed, so an empty
    /// listing is worth another account.
    #[error("no posts found")]
    NoPosts,
}

impl Classify for LinksError {
    fn classification(&self) -> ErrorClassification {
        match self {
            LinksError::Scrape(e) => e.classification(),
            LinksError::NoPosts => ErrorClassification::Retryable,
        }
    }
}

/// `GET /get_profile?username=`
pub async fn get_profile(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    let started = Instant::now();
    let result = profile_lookup(&state, &params, new_request_id()).await;
    finish("get_profile", started, result)
}

#[instrument(skip_all, fields(request_id = %request_id, username = tracing::field::Empty))]
async fn profile_lookup(
    state: &AppState,
    params: &Params,
    request_id: String,
) -> Result<Json<Profile>, ApiError> {
    let username = required(params, "username", "Username parameter is required")?;
    tracing::Span::current().record("username", username);

    let client = Arc::clone(state.executor.client());
    let profile = state
        .executor
        .execute(|session| {
            let client = Arc::clone(&client);
            async move { client.profile(session.handle(), username).await }
        })
        .await
        .map_err(|e| ApiError::from_execute(e, "Profile does not exist"))?;

    info!(username, followers = profile.followers, "profile retrieved");
    Ok(Json(profile))
}

/// `GET /get_insta_post?url=&top_comments_count=3&img_index=1`
pub async fn get_insta_post(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Response {
    let started = Instant::now();
    let result = post_lookup(&state, &params, new_request_id()).await;
    finish("get_insta_post", started, result)
}

#[instrument(skip_all, fields(request_id = %request_id, shortcode = tracing::field::Empty))]
async fn post_lookup(
    state: &AppState,
    params: &Params,
    request_id: String,
) -> Result<Json<Value>, ApiError> {
    let url = required(params, "url", "URL parameter is required")?;
    let top_comments = optional_number(params, "top_comments_count", DEFAULT_TOP_COMMENTS)?;
    let img_index = optional_number(params, "img_index", DEFAULT_IMG_INDEX)?;
    if img_index == 0 {
        return Err(ApiError::BadRequest("img_index starts at 1".into()));
    }
    let shortcode = shortcode_from_url(url)
        .ok_or_else(|| ApiError::BadRequest("URL does not contain a post shortcode".into()))?;
    tracing::Span::current().record("shortcode", shortcode);

    let client = Arc::clone(state.executor.client());
    let post = state
        .executor
        .execute(|session| {
            let client = Arc::clone(&client);
            async move { client.post(session.handle(), shortcode, top_comments).await }
        })
        .await
        .map_err(|e| ApiError::from_execute(e, "Post or profile does not exist"))?;

    info!(shortcode, post_type = %post.typename, "post retrieved");
    post_body(&post, img_index, top_comments).map(Json)
}

/// `GET /get_insta_post_links?operator=&nr=5`
pub async fn get_insta_post_links(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Response {
    let started = Instant::now();
    let result = links_lookup(&state, &params, new_request_id()).await;
    finish("get_insta_post_links", started, result)
}

#[instrument(skip_all, fields(request_id = %request_id, username = tracing::field::Empty))]
async fn links_lookup(
    state: &AppState,
    params: &Params,
    request_id: String,
) -> Result<Json<Value>, ApiError> {
    let operator = required(params, "operator", "Operator parameter is required")?;
    let count = optional_number(params, "nr", DEFAULT_LINK_COUNT)?;
    if count == 0 {
        return Err(ApiError::BadRequest("nr must be at least 1".into()));
    }
    let username = operator_username(operator)
        .ok_or_else(|| ApiError::BadRequest("Operator does not name a profile".into()))?;
    tracing::Span::current().record("username", username);

    let client = Arc::clone(state.executor.client());
    let posts = state
        .executor
        .execute(|session| {
            let client = Arc::clone(&client);
            async move {
                let posts = client.recent_posts(session.handle(), username, count).await?;
                if posts.is_empty() {
                    return Err(LinksError::NoPosts);
                }
                Ok::<_, LinksError>(posts)
            }
        })
        .await
        .map_err(|e| ApiError::from_execute(e, "Profile does not exist"))?;

    let links: Vec<String> = posts.iter().take(count).map(post_link).collect();
    info!(username, links = links.len(), "post links retrieved");
    Ok(Json(serde_json::json!({ "links": links })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use scraper::{Comment, Media, Owner};

    fn post(typename: &str, media: Vec<Media>) -> Post {
        Post {
            shortcode: "C0abc".into(),
            typename: typename.into(),
            likes: 12,
            comments: 4,
            video_view_count: Some(900),
            is_video: false,
            media,
            taken_at: "2024-03-01T08:05:09Z".parse().unwrap(),
            caption: None,
            owner: Owner {
                username: "nasa".into(),
                id: 528817151,
            },
            top_comments: vec![
                Comment {
                    owner: Some("a".into()),
                    text: "first".into(),
                    created_at: None,
                },
                Comment {
                    owner: None,
                    text: "second".into(),
                    created_at: None,
                },
            ],
        }
    }

    fn image(url: &str) -> Media {
        Media::Image {
            image_url: url.into(),
        }
    }

    #[test]
    fn shortcode_is_last_path_segment() {
        assert_eq!(
            shortcode_from_url("https://www.instagram.com/p/C0abc/"),
            Some("C0abc")
        );
        assert_eq!(
            shortcode_from_url("https://www.instagram.com/reel/C0abc/?igsh=xyz#top"),
            Some("C0abc")
        );
        assert_eq!(shortcode_from_url("C0abc"), Some("C0abc"));
        assert_eq!(shortcode_from_url("///"), None);
    }

    #[test]
    fn operator_accepts_username_or_profile_url() {
        assert_eq!(operator_username("nasa"), Some("nasa"));
        assert_eq!(
            operator_username("https://www.instagram.com/nasa/"),
            Some("nasa")
        );
        assert_eq!(
            operator_username("https://www.instagram.com/nasa?hl=en"),
            Some("nasa")
        );
        assert_eq!(operator_username("/"), None);
    }

    #[test]
    fn links_use_reel_path_for_videos() {
        let reel = PostSummary {
            shortcode: "R1".into(),
            typename: "GraphVideo".into(),
        };
        let carousel = PostSummary {
            shortcode: "S1".into(),
            typename: "GraphSidecar".into(),
        };
        assert_eq!(post_link(&reel), "https://www.instagram.com/reel/R1/");
        assert_eq!(post_link(&carousel), "https://www.instagram.com/p/S1/");
    }

    #[test]
    fn post_body_formats_date_and_time() {
        let body = post_body(&post("GraphImage", vec![image("https://cdn/1.jpg")]), 1, 3).unwrap();
        assert_eq!(body["date"], "01.03.2024");
        assert_eq!(body["time"], "08:05:09");
        assert_eq!(body["datetime"], "2024-03-01T08:05:09+00:00");
        assert_eq!(body["cover_image_url"], "https://cdn/1.jpg");
        assert_eq!(body["description"], "");
        assert_eq!(body["owner"]["username"], "nasa");
        assert!(body["views"].is_null(), "views only reported for videos");
        assert_eq!(body["media"][0]["type"], "image");
    }

    #[test]
    fn post_body_datetime_drops_fractional_seconds() {
        let mut post = post("GraphImage", vec![image("https://cdn/1.jpg")]);
        post.taken_at += chrono::TimeDelta::milliseconds(250);

        let body = post_body(&post, 1, 0).unwrap();
        assert_eq!(body["datetime"], "2024-03-01T08:05:09+00:00");
        assert_eq!(body["time"], "08:05:09");
    }

    #[test]
    fn post_body_reports_views_for_video() {
        let mut video = post(
            "GraphVideo",
            vec![Media::Video {
                video_url: "https://cdn/v.mp4".into(),
                thumbnail: "https://cdn/v.jpg".into(),
            }],
        );
        video.is_video = true;

        let body = post_body(&video, 1, 3).unwrap();
        assert_eq!(body["views"], 900);
        assert_eq!(body["cover_image_url"], "https://cdn/v.jpg");
    }

    #[test]
    fn post_body_picks_carousel_cover_by_index() {
        let carousel = post(
            "GraphSidecar",
            vec![image("https://cdn/1.jpg"), image("https://cdn/2.jpg")],
        );
        let body = post_body(&carousel, 2, 3).unwrap();
        assert_eq!(body["cover_image_url"], "https://cdn/2.jpg");

        let err = post_body(&carousel, 3, 3).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Image index out of range");
    }

    #[test]
    fn post_body_caps_comments() {
        let body = post_body(&post("GraphImage", vec![]), 1, 1).unwrap();
        assert_eq!(body["top_comments"].as_array().unwrap().len(), 1);
        assert_eq!(body["top_comments"][0]["text"], "first");
        assert!(body["cover_image_url"].is_null());
    }

    #[test]
    fn empty_listing_is_retryable() {
        assert_eq!(
            LinksError::NoPosts.classification(),
            ErrorClassification::Retryable
        );
        assert_eq!(
            LinksError::from(ScrapeError::NotFound("ghost".into())).classification(),
            ErrorClassification::Terminal
        );
    }

    #[test]
    fn numeric_params_default_and_validate() {
        let mut params = Params::new();
        assert_eq!(optional_number(&params, "nr", 5usize).unwrap(), 5);

        params.insert("nr".into(), "12".into());
        assert_eq!(optional_number(&params, "nr", 5usize).unwrap(), 12);

        params.insert("nr".into(), "-1".into());
        assert!(optional_number(&params, "nr", 5usize).is_err());
    }

    #[test]
    fn request_ids_are_prefixed() {
        let id = new_request_id();
        assert!(id.starts_with("req_"));
        assert_eq!(id.len(), 4 + 32);
    }
}
