//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Account credentials are loaded from the SCRAPER_ACCOUNTS env var or
//! credentials_file, never stored in the TOML directly to avoid leaking secrets.

use reqwest::Url;
use serde::Deserialize;
use session_pool::{Credential, ProxyEndpoint};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mobile Safari, the client the scraping backend expects by default.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) \
     AppleWebKit/537.36 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/537.36";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Inbound HTTP settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Scraping backend settings
#[derive(Debug, Deserialize)]
pub struct ScraperConfig {
    pub upstream_url: String,
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_terminal_statuses")]
    pub terminal_statuses: Vec<u16>,
}

/// Account pool settings
#[derive(Debug, Default, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub proxies: Vec<String>,
    /// JSON array of {"username", "password"} (alternative to SCRAPER_ACCOUNTS)
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// Attempts per lookup. Defaults to the number of accounts.
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(skip)]
    pub proxy_endpoints: Vec<ProxyEndpoint>,
}

fn default_max_connections() -> usize {
    256
}

fn default_login_timeout() -> u64 {
    20
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_terminal_statuses() -> Vec<u16> {
    scraper::status::DEFAULT_TERMINAL_STATUSES.to_vec()
}

impl ScraperConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parsed upstream URL. Validated by `Config::load`.
    pub fn upstream(&self) -> common::Result<Url> {
        Url::parse(&self.upstream_url).map_err(|e| {
            common::Error::Config(format!("invalid upstream_url {}: {e}", self.upstream_url))
        })
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        // Validate upstream_url is a valid URL with http(s) scheme
        if !config.scraper.upstream_url.starts_with("http://")
            && !config.scraper.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.scraper.upstream_url
            )));
        }
        config.scraper.upstream()?;

        if config.scraper.login_timeout_secs == 0 {
            return Err(common::Error::Config(
                "login_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.scraper.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.pool.max_attempts == Some(0) {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }

        config.pool.proxy_endpoints = config
            .pool
            .proxies
            .iter()
            .map(|p| ProxyEndpoint::new(p.as_str()))
            .collect::<common::Result<_>>()?;

        Ok(config)
    }

    /// Resolve scraping accounts.
    ///
    /// Resolution order:
    /// 1. SCRAPER_ACCOUNTS env var (`user:pass,user2:pass2`)
    /// 2. credentials_file path from config
    ///
    /// An empty result is an error: the gateway cannot log in without accounts.
    pub async fn resolve_accounts(&self) -> common::Result<Vec<Credential>> {
        let accounts = if let Ok(raw) = std::env::var("SCRAPER_ACCOUNTS") {
            session_pool::parse_accounts(&raw)?
        } else if let Some(ref path) = self.pool.credentials_file {
            session_pool::load_accounts_file(path).await?
        } else {
            Vec::new()
        };

        if accounts.is_empty() {
            return Err(common::Error::Config(
                "no scraping accounts configured; set SCRAPER_ACCOUNTS or pool.credentials_file"
                    .into(),
            ));
        }
        Ok(accounts)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("social-gateway.toml")
    }
}
