//! Static account and proxy data
//!
//! Credentials and proxy endpoints are loaded once at startup and never
//! mutated afterwards. Accounts come either from an environment variable
//! (`user:pass,user2:pass2`) or from a JSON file:
//!
//! ```json
//! [
//!   {"username": "first_account", "password": "..."},
//!   {"username": "second_account", "password": "..."}
//! ]
//! ```

use std::collections::HashSet;
use std::path::Path;

use common::Secret;
use serde::Deserialize;
use tracing::{info, warn};

/// One login identity. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    #[serde(rename = "username")]
    pub identifier: String,
    #[serde(rename = "password")]
    pub secret: Secret<String>,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: Secret::new(secret.into()),
        }
    }
}

/// Egress proxy address, e.g. `http://10.0.0.2:3128`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    address: String,
}

impl ProxyEndpoint {
    /// Validate and wrap a proxy URL. Only http(s) proxies are supported.
    pub fn new(address: impl Into<String>) -> common::Result<Self> {
        let address = address.into().trim().to_string();
        let rest = address
            .strip_prefix("http://")
            .or_else(|| address.strip_prefix("https://"));
        match rest {
            Some(host) if !host.is_empty() => Ok(Self { address }),
            _ => Err(common::Error::Config(format!(
                "proxy must be an http:// or https:// URL with a host, got: {address}"
            ))),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// A (credential, optional proxy) pairing for one login attempt.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub credential: Credential,
    pub proxy: Option<ProxyEndpoint>,
}

/// Parse the `user:pass,user2:pass2` account list format.
///
/// Splits each entry on the first `:` so passwords may contain colons.
pub fn parse_accounts(raw: &str) -> common::Result<Vec<Credential>> {
    let mut accounts = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (user, pass) = entry.split_once(':').ok_or_else(|| {
            common::Error::Config(format!(
                "account entry must be username:password, got entry without ':' ({} chars)",
                entry.len()
            ))
        })?;
        accounts.push(Credential::new(user.trim(), pass));
    }
    validate(&accounts)?;
    Ok(accounts)
}

/// Load accounts from a JSON file.
pub async fn load_accounts_file(path: &Path) -> common::Result<Vec<Credential>> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        common::Error::Config(format!("failed to read accounts file {}: {e}", path.display()))
    })?;
    let accounts: Vec<Credential> = serde_json::from_str(&contents)?;
    validate(&accounts)?;
    info!(path = %path.display(), accounts = accounts.len(), "loaded accounts");
    Ok(accounts)
}

fn validate(accounts: &[Credential]) -> common::Result<()> {
    let mut seen = HashSet::new();
    for account in accounts {
        if account.identifier.is_empty() {
            return Err(common::Error::Config("account with empty username".into()));
        }
        if !seen.insert(account.identifier.as_str()) {
            warn!(
                account = %account.identifier,
                "duplicate account in pool, it will be tried more than once per rotation"
            );
        }
    }
    Ok(())
}
