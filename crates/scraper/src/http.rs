//! HTTP scraping backend adapter
//!
//! Talks to a scraping backend that exposes session login and lookup
//! endpoints:
//!
//! - `POST /v1/sessions` (form: username, password) → `{"session_id": "..."}`
//! - `GET  /v1/profiles/{username}`
//! - `GET  /v1/profiles/{username}/posts?limit=N`
//! - `GET  /v1/posts/{shortcode}?comments=N`
//!
//! Each login builds its own reqwest client routed through the candidate's
//! proxy. That client becomes the session's transport, so every lookup made
//! with the session leaves through the same egress as the login did.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::status::StatusPolicy;
use crate::types::{Post, PostSummary, Profile};
use crate::{Result, ScrapeError, ScraperClient, SessionHandle};

/// Header carrying the backend session id on lookup requests.
const SESSION_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session_id: String,
}

/// reqwest-backed `ScraperClient`.
pub struct HttpScraper {
    base_url: Url,
    user_agent: String,
    request_timeout: Duration,
    policy: StatusPolicy,
}

impl HttpScraper {
    pub fn new(
        base_url: Url,
        user_agent: impl Into<String>,
        request_timeout: Duration,
        policy: StatusPolicy,
    ) -> Self {
        Self {
            base_url,
            user_agent: user_agent.into(),
            request_timeout,
            policy,
        }
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ScrapeError::Transport(format!("base url cannot carry a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Build the per-session transport, optionally routed through a proxy.
    fn build_transport(&self, proxy_url: Option<&str>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.request_timeout);
        if let Some(proxy_url) = proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ScrapeError::Transport(format!("invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| ScrapeError::Transport(format!("building http client: {e}")))
    }

    /// Turn a backend response into `T`, classifying non-success statuses.
    async fn read_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.policy.error_for(status.as_u16(), &body));
        }
        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout(e.to_string())
            } else {
                ScrapeError::Malformed(e.to_string())
            }
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, session: &SessionHandle, url: Url) -> Result<T> {
        debug!(account = session.account(), path = url.path(), "scraper lookup");
        let response = session
            .transport()
            .get(url)
            .header(SESSION_HEADER, session.token().expose().as_str())
            .send()
            .await
            .map_err(send_error)?;
        self.read_json(response).await
    }
}

fn send_error(e: reqwest::Error) -> ScrapeError {
    if e.is_timeout() {
        ScrapeError::Timeout(e.to_string())
    } else {
        ScrapeError::Transport(e.to_string())
    }
}

impl ScraperClient for HttpScraper {
    fn id(&self) -> &str {
        "http"
    }

    fn login<'a>(
        &'a self,
        username: &'a str,
        password: &'a Secret<String>,
        proxy: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<SessionHandle>> + Send + 'a>> {
        Box::pin(async move {
            let transport = self.build_transport(proxy)?;
            let url = self.endpoint(&["v1", "sessions"])?;
            let response = transport
                .post(url)
                .form(&[("username", username), ("password", password.expose().as_str())])
                .send()
                .await
                .map_err(send_error)?;
            let login: LoginResponse = self.read_json(response).await?;
            debug!(account = username, proxied = proxy.is_some(), "backend session established");
            Ok(SessionHandle::new(
                username,
                Secret::new(login.session_id),
                transport,
            ))
        })
    }

    fn profile<'a>(
        &'a self,
        session: &'a SessionHandle,
        username: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Profile>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.endpoint(&["v1", "profiles", username])?;
            self.get_json(session, url).await
        })
    }

    fn post<'a>(
        &'a self,
        session: &'a SessionHandle,
        shortcode: &'a str,
        top_comments: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Post>> + Send + 'a>> {
        Box::pin(async move {
            let mut url = self.endpoint(&["v1", "posts", shortcode])?;
            url.query_pairs_mut()
                .append_pair("comments", &top_comments.to_string());
            self.get_json(session, url).await
        })
    }

    fn recent_posts<'a>(
        &'a self,
        session: &'a SessionHandle,
        username: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostSummary>>> + Send + 'a>> {
        Box::pin(async move {
            let mut url = self.endpoint(&["v1", "profiles", username, "posts"])?;
            url.query_pairs_mut().append_pair("limit", &limit.to_string());
            let mut posts: Vec<PostSummary> = self.get_json(session, url).await?;
            posts.truncate(limit);
            Ok(posts)
        })
    }
}
