//! Session construction from a candidate

use std::sync::Arc;
use std::time::{Duration, Instant};

use scraper::{ScrapeError, ScraperClient, SessionHandle};
use tracing::{info, warn};

use crate::credentials::{Candidate, ProxyEndpoint};
use crate::error::AuthError;

/// An authenticated session plus where it came from.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    credential_id: String,
    proxy: Option<ProxyEndpoint>,
    created_at: Instant,
}

impl Session {
    pub fn new(handle: SessionHandle, credential_id: String, proxy: Option<ProxyEndpoint>) -> Self {
        Self {
            handle,
            credential_id,
            proxy,
            created_at: Instant::now(),
        }
    }

    /// Handle to pass to `ScraperClient` lookups.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Account the session authenticated as.
    pub fn credential_id(&self) -> &str {
        &self.credential_id
    }

    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.proxy.as_ref()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Performs the login handshake for one candidate.
///
/// Stateless apart from the client: it never touches the pool cursor or the
/// cached session.
pub struct SessionFactory {
    client: Arc<dyn ScraperClient>,
    login_timeout: Duration,
}

impl SessionFactory {
    pub fn new(client: Arc<dyn ScraperClient>, login_timeout: Duration) -> Self {
        Self {
            client,
            login_timeout,
        }
    }

    /// Client used for logins. Lookups go through the same client.
    pub fn client(&self) -> &Arc<dyn ScraperClient> {
        &self.client
    }

    /// Log in with the candidate's credential through its proxy.
    pub async fn create(&self, candidate: &Candidate) -> Result<Session, AuthError> {
        let account = candidate.credential.identifier.as_str();
        let proxy = candidate.proxy.as_ref().map(ProxyEndpoint::address);
        info!(
            account,
            proxy = proxy.unwrap_or("direct"),
            backend = self.client.id(),
            "logging in"
        );

        let login = self
            .client
            .login(account, &candidate.credential.secret, proxy);
        let result = match tokio::time::timeout(self.login_timeout, login).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::Timeout(format!(
                "login did not complete within {:?}",
                self.login_timeout
            ))),
        };

        match result {
            Ok(handle) => {
                metrics::counter!("session_logins_total", "outcome" => "success").increment(1);
                info!(account, "login succeeded");
                Ok(Session::new(
                    handle,
                    account.to_string(),
                    candidate.proxy.clone(),
                ))
            }
            Err(source) => {
                metrics::counter!("session_logins_total", "outcome" => source.label())
                    .increment(1);
                warn!(account, error = %source, "login failed");
                Err(AuthError {
                    account: account.to_string(),
                    source,
                })
            }
        }
    }
}
