//! Scraping client abstraction for social profile and post lookups
//!
//! Defines the `ScraperClient` trait that decouples the failover machinery from
//! whatever actually talks to the social network. `HttpScraper` is the reqwest
//! adapter for a scraping backend; tests substitute in-memory fakes.
//!
//! Every failure a client can produce is a `ScrapeError`, and every
//! `ScrapeError` carries an `ErrorClassification` through the `Classify` trait.
//! The failover executor only ever looks at that classification.

pub mod http;
pub mod status;
pub mod types;

pub use http::HttpScraper;
pub use status::StatusPolicy;
pub use types::{Comment, Media, Owner, Post, PostSummary, Profile};

use common::Secret;
use std::future::Future;
use std::pin::Pin;

/// Classification of scrape failures to determine retry/failover strategy.
///
/// - Terminal: the target does not exist; no account or proxy will change that
/// - Retryable: the session, account, or route is suspect; rotate and retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Profile or post does not exist, stop immediately
    Terminal,
    /// Rate limit, ban, transport failure, timeout, unexpected payload
    Retryable,
}

impl ErrorClassification {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::Terminal => "terminal",
            ErrorClassification::Retryable => "retryable",
        }
    }
}

/// Errors that know whether retrying on another account can help.
///
/// Operation closures handed to the failover executor return errors
/// implementing this trait. Implement it for your own error type to plug a
/// different policy in.
pub trait Classify {
    fn classification(&self) -> ErrorClassification;
}

/// Errors from scraping client operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScrapeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ScrapeError {
    /// Short label for metrics (`error_type`).
    pub fn label(&self) -> &'static str {
        match self {
            ScrapeError::NotFound(_) => "not_found",
            ScrapeError::Unauthorized(_) => "unauthorized",
            ScrapeError::RateLimited(_) => "rate_limited",
            ScrapeError::Upstream { .. } => "upstream",
            ScrapeError::Transport(_) => "transport",
            ScrapeError::Timeout(_) => "timeout",
            ScrapeError::Malformed(_) => "malformed",
        }
    }
}

impl Classify for ScrapeError {
    fn classification(&self) -> ErrorClassification {
        match self {
            ScrapeError::NotFound(_) => ErrorClassification::Terminal,
            _ => ErrorClassification::Retryable,
        }
    }
}

/// Result alias for scraping operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Authenticated scraping session.
///
/// Holds the per-login transport (a reqwest client already routed through the
/// candidate's proxy) and the backend session token. Opaque outside this crate
/// apart from the owning account.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    account: String,
    token: Secret<String>,
    transport: reqwest::Client,
}

impl SessionHandle {
    pub fn new(account: impl Into<String>, token: Secret<String>, transport: reqwest::Client) -> Self {
        Self {
            account: account.into(),
            token,
            transport,
        }
    }

    /// Account the session was authenticated as.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub(crate) fn token(&self) -> &Secret<String> {
        &self.token
    }

    pub(crate) fn transport(&self) -> &reqwest::Client {
        &self.transport
    }
}

/// Abstraction over the external scraping client.
///
/// `login` performs the authentication handshake; the lookup methods run
/// against a session produced by `login`. Implementations must map every
/// failure to a `ScrapeError` whose classification is accurate: returning
/// `NotFound` for a throttled request ends the failover loop early, and
/// returning anything else for a missing profile burns the whole attempt
/// budget.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn ScraperClient>`).
pub trait ScraperClient: Send + Sync {
    /// Identifier for logging and health reporting (e.g. "http")
    fn id(&self) -> &str;

    /// Authenticate as `username`, routing traffic through `proxy` when given.
    fn login<'a>(
        &'a self,
        username: &'a str,
        password: &'a Secret<String>,
        proxy: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<SessionHandle>> + Send + 'a>>;

    /// Look up a profile by username.
    fn profile<'a>(
        &'a self,
        session: &'a SessionHandle,
        username: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Profile>> + Send + 'a>>;

    /// Look up a post by shortcode, including up to `top_comments` comments.
    fn post<'a>(
        &'a self,
        session: &'a SessionHandle,
        shortcode: &'a str,
        top_comments: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Post>> + Send + 'a>>;

    /// Most recent posts of a profile, newest first, at most `limit`.
    fn recent_posts<'a>(
        &'a self,
        session: &'a SessionHandle,
        username: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostSummary>>> + Send + 'a>>;
}
