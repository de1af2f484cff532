//! Status classification for scraping backend responses
//!
//! Maps a non-success HTTP status plus response body to a `ScrapeError`.
//! Which statuses mean "the target does not exist" is configurable; everything
//! outside that set is retryable on another account.

use crate::ScrapeError;

/// Body phrases that mean the account is being throttled, whatever the status.
///
/// The social network answers throttled sessions with 400/403 as often as 429.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "please wait a few minutes",
    "rate limit",
    "too many requests",
    "try again later",
];

/// Body phrases that mean the account needs manual verification or is banned.
const ACCOUNT_BLOCKED_PATTERNS: &[&str] = &[
    "checkpoint_required",
    "challenge_required",
    "login_required",
    "feedback_required",
];

/// Statuses treated as "resource does not exist" unless configured otherwise.
pub const DEFAULT_TERMINAL_STATUSES: &[u16] = &[404, 410];

/// Policy deciding which upstream statuses are terminal.
#[derive(Debug, Clone)]
pub struct StatusPolicy {
    terminal: Vec<u16>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            terminal: DEFAULT_TERMINAL_STATUSES.to_vec(),
        }
    }
}

impl StatusPolicy {
    pub fn new(terminal: Vec<u16>) -> Self {
        Self { terminal }
    }

    pub fn terminal_statuses(&self) -> &[u16] {
        &self.terminal
    }

    /// Classify a non-success response into a `ScrapeError`.
    ///
    /// Terminal statuses become `NotFound`. 429 and throttling phrases become
    /// `RateLimited`. 401/403 and account-block phrases become `Unauthorized`.
    /// Everything else is `Upstream`.
    pub fn error_for(&self, status: u16, body: &str) -> ScrapeError {
        if self.terminal.contains(&status) {
            return ScrapeError::NotFound(summarize(body, status));
        }

        let lower = body.to_lowercase();
        if status == 429 || contains_any(&lower, RATE_LIMIT_PATTERNS) {
            return ScrapeError::RateLimited(summarize(body, status));
        }
        if matches!(status, 401 | 403) || contains_any(&lower, ACCOUNT_BLOCKED_PATTERNS) {
            return ScrapeError::Unauthorized(summarize(body, status));
        }

        ScrapeError::Upstream {
            status,
            message: summarize(body, status),
        }
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Upstream bodies can be whole HTML pages; keep error messages log-sized.
fn summarize(body: &str, status: u16) -> String {
    const MAX_LEN: usize = 200;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("status {status}");
    }
    match trimmed.char_indices().nth(MAX_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
