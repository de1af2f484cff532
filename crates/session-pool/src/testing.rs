//! In-memory scraper for unit tests

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use common::Secret;
use scraper::{Owner, Post, PostSummary, Profile, ScrapeError, ScraperClient, SessionHandle};

/// Records every login and fails the ones it was told to.
#[derive(Default)]
pub struct FakeScraper {
    failing: HashSet<String>,
    missing: HashSet<String>,
    login_delay: Option<Duration>,
    logins: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeScraper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logins for `account` fail with `Unauthorized`.
    pub fn failing_login(mut self, account: &str) -> Self {
        self.failing.insert(account.to_string());
        self
    }

    /// Profile lookups for `username` fail with `NotFound`.
    pub fn missing_profile(mut self, username: &str) -> Self {
        self.missing.insert(username.to_string());
        self
    }

    pub fn login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    /// Accounts in the order logins were attempted.
    pub fn logins(&self) -> Vec<String> {
        self.logins
            .lock()
            .unwrap()
            .iter()
            .map(|(account, _)| account.clone())
            .collect()
    }

    pub fn login_proxies(&self) -> Vec<Option<String>> {
        self.logins
            .lock()
            .unwrap()
            .iter()
            .map(|(_, proxy)| proxy.clone())
            .collect()
    }
}

impl ScraperClient for FakeScraper {
    fn id(&self) -> &str {
        "fake"
    }

    fn login<'a>(
        &'a self,
        username: &'a str,
        _password: &'a Secret<String>,
        proxy: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = scraper::Result<SessionHandle>> + Send + 'a>> {
        Box::pin(async move {
            self.logins
                .lock()
                .unwrap()
                .push((username.to_string(), proxy.map(str::to_string)));
            if let Some(delay) = self.login_delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(username) {
                return Err(ScrapeError::Unauthorized(format!("{username} is banned")));
            }
            Ok(SessionHandle::new(
                username,
                Secret::new(format!("tok-{username}")),
                reqwest::Client::new(),
            ))
        })
    }

    fn profile<'a>(
        &'a self,
        _session: &'a SessionHandle,
        username: &'a str,
    ) -> Pin<Box<dyn Future<Output = scraper::Result<Profile>> + Send + 'a>> {
        Box::pin(async move {
            if self.missing.contains(username) {
                return Err(ScrapeError::NotFound(format!("profile {username}")));
            }
            Ok(Profile {
                username: username.to_string(),
                userid: 1,
                posts: 3,
                followers: 10,
                following: 5,
                bio: String::new(),
                external_url: None,
                profile_pic: None,
                is_private: false,
                is_verified: false,
            })
        })
    }

    fn post<'a>(
        &'a self,
        _session: &'a SessionHandle,
        shortcode: &'a str,
        _top_comments: usize,
    ) -> Pin<Box<dyn Future<Output = scraper::Result<Post>> + Send + 'a>> {
        Box::pin(async move {
            Ok(Post {
                shortcode: shortcode.to_string(),
                typename: "GraphImage".into(),
                likes: 0,
                comments: 0,
                video_view_count: None,
                is_video: false,
                media: vec![],
                taken_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
                caption: None,
                owner: Owner {
                    username: "owner".into(),
                    id: 1,
                },
                top_comments: vec![],
            })
        })
    }

    fn recent_posts<'a>(
        &'a self,
        _session: &'a SessionHandle,
        _username: &'a str,
        _limit: usize,
    ) -> Pin<Box<dyn Future<Output = scraper::Result<Vec<PostSummary>>> + Send + 'a>> {
        Box::pin(async move { Ok(vec![]) })
    }
}
