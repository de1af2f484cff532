//! Error types for session acquisition

use scraper::ScrapeError;

/// One candidate failed the login handshake.
///
/// Always retryable at the candidate level: the cache moves on to the next
/// credential.
#[derive(Debug, thiserror::Error)]
#[error("authentication failed for {account}: {source}")]
pub struct AuthError {
    pub account: String,
    pub source: ScrapeError,
}

/// Errors from pool and session cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Nothing to rotate through. Fatal at startup.
    #[error("credential pool is empty")]
    EmptyPool,

    /// A full pass over the pool produced no session.
    #[error("all {attempts} candidate(s) failed to authenticate; last: {last}")]
    Exhausted { attempts: usize, last: AuthError },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
