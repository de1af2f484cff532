//! Credential rotation and proxy selection
//!
//! The pool holds the static account list and the proxy list. `next()` hands
//! out the account under the rotation cursor and moves the cursor one step,
//! wrapping at the end of the list. The proxy for each candidate is drawn
//! independently from the injected `RandomSource`, so credential rotation and
//! proxy assignment never fall into lockstep.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info};

use crate::credentials::{Candidate, Credential, ProxyEndpoint};
use crate::error::{Error, Result};
use crate::random::{RandomSource, ThreadRandom};

/// Static account pool with a process-wide rotation cursor.
///
/// The cursor is an `AtomicUsize` kept in `0..size()`. Concurrent callers each
/// get a distinct position per step.
pub struct CredentialPool {
    credentials: Vec<Credential>,
    proxies: Vec<ProxyEndpoint>,
    cursor: AtomicUsize,
    random: Arc<dyn RandomSource>,
}

impl CredentialPool {
    /// Create a pool over `credentials`, drawing proxies from `random`.
    ///
    /// Returns `EmptyPool` when there are no credentials: with nothing to
    /// rotate through the gateway cannot serve a single lookup.
    pub fn new(
        credentials: Vec<Credential>,
        proxies: Vec<ProxyEndpoint>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::EmptyPool);
        }
        info!(
            accounts = credentials.len(),
            proxies = proxies.len(),
            "credential pool initialized"
        );
        Ok(Self {
            credentials,
            proxies,
            cursor: AtomicUsize::new(0),
            random,
        })
    }

    /// Create a pool that picks proxies with the thread RNG.
    pub fn with_thread_rng(
        credentials: Vec<Credential>,
        proxies: Vec<ProxyEndpoint>,
    ) -> Result<Self> {
        Self::new(credentials, proxies, Arc::new(ThreadRandom))
    }

    /// Candidate under the cursor, then advance the cursor by one.
    pub fn next(&self) -> Candidate {
        let n = self.credentials.len();
        let index = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % n))
        {
            Ok(previous) | Err(previous) => previous,
        };

        let proxy = if self.proxies.is_empty() {
            None
        } else {
            let pick = self.random.pick(self.proxies.len()) % self.proxies.len();
            Some(self.proxies[pick].clone())
        };

        let credential = self.credentials[index].clone();
        debug!(
            account = %credential.identifier,
            position = index,
            proxy = proxy.as_ref().map(ProxyEndpoint::address).unwrap_or("direct"),
            "candidate selected"
        );
        Candidate { credential, proxy }
    }

    /// Number of credentials.
    pub fn size(&self) -> usize {
        self.credentials.len()
    }

    /// Number of configured proxies (0 means direct connections).
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Position the next call to `next()` will hand out.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Account identifiers in rotation order.
    pub fn identifiers(&self) -> Vec<String> {
        self.credentials
            .iter()
            .map(|c| c.identifier.clone())
            .collect()
    }
}
