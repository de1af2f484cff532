//! Shared session slot with single-flight construction

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::factory::{Session, SessionFactory};
use crate::pool::CredentialPool;

/// What the cache holds right now, as seen by observers.
#[derive(Debug, Clone)]
pub enum SessionState {
    Ready(Arc<Session>),
    /// A login pass is in flight.
    Building,
    Empty,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Ready(_) => "ready",
            SessionState::Building => "building",
            SessionState::Empty => "empty",
        }
    }
}

/// Holds at most one live session, built lazily from the pool.
///
/// The slot mutex is held while a session is being built, so callers that
/// find the slot empty at the same time wait for one login sequence instead
/// of each starting their own. `published` mirrors the slot and is only
/// written with the slot held; observers read it without queueing behind a
/// login.
pub struct SessionCache {
    pool: Arc<CredentialPool>,
    factory: SessionFactory,
    slot: Mutex<Option<Arc<Session>>>,
    published: RwLock<Option<Arc<Session>>>,
}

impl SessionCache {
    pub fn new(pool: Arc<CredentialPool>, factory: SessionFactory) -> Self {
        Self {
            pool,
            factory,
            slot: Mutex::new(None),
            published: RwLock::new(None),
        }
    }

    /// Cached session, or a new one from one full pass over the pool.
    ///
    /// Tries `pool.size()` candidates in rotation order and caches the first
    /// that logs in. If all of them fail, returns `Exhausted` carrying the
    /// last login error. The cursor keeps its position across calls, so a
    /// later pass starts where this one stopped.
    pub async fn get(&self) -> Result<Arc<Session>> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let attempts = self.pool.size();
        let mut last = None;
        for _ in 0..attempts {
            let candidate = self.pool.next();
            match self.factory.create(&candidate).await {
                Ok(session) => {
                    let session = Arc::new(session);
                    info!(account = session.credential_id(), "session cached");
                    *slot = Some(Arc::clone(&session));
                    *self.published.write().await = Some(Arc::clone(&session));
                    return Ok(session);
                }
                Err(e) => last = Some(e),
            }
        }

        match last {
            Some(last) => {
                warn!(attempts, error = %last, "no candidate could log in");
                Err(Error::Exhausted { attempts, last })
            }
            None => Err(Error::EmptyPool),
        }
    }

    /// Drop the cached session. No-op if none is cached.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.take() {
            *self.published.write().await = None;
            debug!(account = session.credential_id(), "session invalidated");
        }
    }

    /// Drop the cached session only if it is `session`.
    ///
    /// Returns whether anything was dropped. A failure reported against a
    /// session that was already replaced leaves the replacement in place.
    pub async fn invalidate_if_current(&self, session: &Arc<Session>) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, session) => {
                debug!(account = session.credential_id(), "session invalidated");
                *slot = None;
                *self.published.write().await = None;
                true
            }
            _ => false,
        }
    }

    /// Cached session without building one. Never waits for a login.
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.published.read().await.clone()
    }

    /// Like `current`, but tells an empty slot apart from one being built.
    pub async fn state(&self) -> SessionState {
        if let Some(session) = self.current().await {
            return SessionState::Ready(session);
        }
        match self.slot.try_lock() {
            Ok(_) => SessionState::Empty,
            Err(_) => SessionState::Building,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }
}
