//! Session acquisition and failover for scraping accounts
//!
//! Keeps one authenticated scraping session alive and replaces it when it
//! stops working. The pieces, bottom-up:
//!
//! - `CredentialPool`: static accounts and proxies, a rotating cursor over the
//!   accounts, and a random proxy per login attempt
//! - `SessionFactory`: the login handshake for one candidate
//! - `SessionCache`: the single shared session, built lazily with one pass
//!   over the pool
//! - `FailoverExecutor`: runs an operation against the cached session,
//!   rotating to a fresh session on retryable failures
//!
//! Session lifecycle:
//! 1. First request finds the cache empty, pool hands out account A
//! 2. A logs in, session cached, every request reuses it
//! 3. An operation fails with a retryable error (throttled, banned, timeout)
//!    → session dropped
//! 4. Next attempt logs in with account B, and so on until the attempt budget
//!    is spent
//! 5. A terminal error (profile gone) ends the request at once and the session
//!    stays cached

pub mod cache;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod factory;
pub mod pool;
pub mod random;

#[cfg(test)]
mod testing;

pub use cache::{SessionCache, SessionState};
pub use credentials::{Candidate, Credential, ProxyEndpoint, load_accounts_file, parse_accounts};
pub use error::{AuthError, Error, Result};
pub use executor::{ExecuteError, FailoverExecutor, Failure};
pub use factory::{Session, SessionFactory};
pub use pool::CredentialPool;
pub use random::{RandomSource, SeededRandom, ThreadRandom};
