//! Failover loop around session-bound operations
//!
//! `execute` runs an operation against the cached session. A terminal error
//! ends the loop at once and leaves the session alone. A retryable error
//! (including an operation timeout) drops the session, which makes the next
//! attempt log in with the next credential in rotation. After `max_attempts`
//! attempts the last error is surfaced as `Exhausted`.
//!
//! ```text
//! Attempting(1) ──ok──────────────► Succeeded
//!      │ ──terminal──────────────► TerminalFailed
//!      │ ──no session────────────► ExhaustedFailed
//!      └──retryable, k < max──► Attempting(k+1)
//!         retryable, k = max──► ExhaustedFailed
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use scraper::{Classify, ErrorClassification, ScraperClient};
use tracing::{info, warn};

use crate::cache::{SessionCache, SessionState};
use crate::error::Error;
use crate::factory::Session;

/// Why a single attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum Failure<E> {
    /// No session could be obtained.
    #[error(transparent)]
    Session(Error),

    /// The operation returned a retryable error.
    #[error("{0}")]
    Operation(E),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of a failed `execute`.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    /// The requested resource does not exist. Never retried.
    #[error("{error}")]
    Terminal { attempts: usize, error: E },

    /// Every attempt failed; `last` is the most recent failure.
    #[error("all {attempts} attempt(s) failed; last: {last}")]
    Exhausted { attempts: usize, last: Failure<E> },
}

impl<E> ExecuteError<E> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecuteError::Terminal { .. })
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> usize {
        match self {
            ExecuteError::Terminal { attempts, .. } | ExecuteError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

enum Attempt<T, E> {
    Succeeded(T),
    Terminal(E),
    Retryable(Failure<E>),
}

enum Decision<T, E> {
    Return(Result<T, ExecuteError<E>>),
    Retry(Failure<E>),
}

/// Transition out of `Attempting(attempt)`.
fn decide<T, E>(attempt: usize, max_attempts: usize, outcome: Attempt<T, E>) -> Decision<T, E> {
    match outcome {
        Attempt::Succeeded(value) => Decision::Return(Ok(value)),
        Attempt::Terminal(error) => Decision::Return(Err(ExecuteError::Terminal {
            attempts: attempt,
            error,
        })),
        Attempt::Retryable(failure) if attempt < max_attempts => Decision::Retry(failure),
        Attempt::Retryable(failure) => Decision::Return(Err(ExecuteError::Exhausted {
            attempts: attempt,
            last: failure,
        })),
    }
}

fn outcome_label<T, E>(result: &Result<T, ExecuteError<E>>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(ExecuteError::Terminal { .. }) => "terminal",
        Err(ExecuteError::Exhausted { .. }) => "exhausted",
    }
}

/// Runs operations with credential failover.
pub struct FailoverExecutor {
    cache: Arc<SessionCache>,
    max_attempts: usize,
    operation_timeout: Duration,
    exhausted_streak: AtomicUsize,
}

impl FailoverExecutor {
    /// Executor trying each account once per operation.
    pub fn new(cache: Arc<SessionCache>, operation_timeout: Duration) -> Self {
        let max_attempts = cache.pool().size();
        Self {
            cache,
            max_attempts,
            operation_timeout,
            exhausted_streak: AtomicUsize::new(0),
        }
    }

    /// Override the attempt budget. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    /// Client the sessions were created with.
    pub fn client(&self) -> &Arc<dyn ScraperClient> {
        self.cache.factory().client()
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget runs out.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ExecuteError<E>>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 1;
        let result = loop {
            let session = match self.cache.get().await {
                Ok(session) => session,
                Err(e) => {
                    metrics::counter!("failover_attempts_total", "outcome" => "no_session")
                        .increment(1);
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "no session available");
                    break Err(ExecuteError::Exhausted {
                        attempts: attempt,
                        last: Failure::Session(e),
                    });
                }
            };

            let outcome =
                match tokio::time::timeout(self.operation_timeout, operation(Arc::clone(&session)))
                    .await
                {
                    Ok(Ok(value)) => Attempt::Succeeded(value),
                    Ok(Err(e)) => match e.classification() {
                        ErrorClassification::Terminal => Attempt::Terminal(e),
                        ErrorClassification::Retryable => {
                            Attempt::Retryable(Failure::Operation(e))
                        }
                    },
                    Err(_) => Attempt::Retryable(Failure::Timeout(self.operation_timeout)),
                };

            let label = match &outcome {
                Attempt::Succeeded(_) => "success",
                Attempt::Terminal(_) => "terminal",
                Attempt::Retryable(_) => "retryable",
            };
            metrics::counter!("failover_attempts_total", "outcome" => label).increment(1);

            if let Attempt::Retryable(failure) = &outcome {
                warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    account = session.credential_id(),
                    error = %failure,
                    "attempt failed, rotating session"
                );
                self.cache.invalidate_if_current(&session).await;
            }

            match decide(attempt, self.max_attempts, outcome) {
                Decision::Return(result) => break result,
                Decision::Retry(_) => attempt += 1,
            }
        };

        metrics::counter!("failover_executions_total", "outcome" => outcome_label(&result))
            .increment(1);
        match &result {
            Err(ExecuteError::Exhausted { attempts, last }) => {
                self.exhausted_streak.fetch_add(1, Ordering::Relaxed);
                warn!(attempts, error = %last, "failover exhausted");
            }
            Err(ExecuteError::Terminal { attempts, error }) => {
                self.exhausted_streak.store(0, Ordering::Relaxed);
                info!(attempts, error = %error, "terminal failure, not retrying");
            }
            Ok(_) => self.exhausted_streak.store(0, Ordering::Relaxed),
        }
        result
    }

    /// Pool and session status for the health endpoint.
    ///
    /// Does not wait for an in-flight login; `session_state` reports
    /// `building` while one runs.
    pub async fn health(&self) -> serde_json::Value {
        let pool = self.cache.pool();
        let state = self.cache.state().await;
        let session = match &state {
            SessionState::Ready(s) => Some(serde_json::json!({
                "account": s.credential_id(),
                "proxied": s.proxy().is_some(),
                "age_secs": s.age().as_secs(),
            })),
            SessionState::Building | SessionState::Empty => None,
        };
        let streak = self.exhausted_streak.load(Ordering::Relaxed);

        serde_json::json!({
            "status": if streak == 0 { "healthy" } else { "degraded" },
            "backend": self.client().id(),
            "accounts": pool.identifiers(),
            "pool_size": pool.size(),
            "proxies": pool.proxy_count(),
            "cursor": pool.cursor(),
            "max_attempts": self.max_attempts,
            "consecutive_exhausted": streak,
            "session": session,
            "session_state": state.label(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::factory::SessionFactory;
    use crate::pool::CredentialPool;
    use crate::testing::FakeScraper;
    use scraper::ScrapeError;
    use std::sync::Mutex;

    fn executor(fake: Arc<FakeScraper>, ids: &[&str]) -> FailoverExecutor {
        let credentials = ids.iter().map(|id| Credential::new(*id, "pw")).collect();
        let pool = Arc::new(CredentialPool::with_thread_rng(credentials, vec![]).unwrap());
        let factory = SessionFactory::new(fake, Duration::from_secs(5));
        let cache = Arc::new(SessionCache::new(pool, factory));
        FailoverExecutor::new(cache, Duration::from_secs(5))
    }

    /// Records which account each operation call ran as.
    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<Vec<String>>>);

    impl Calls {
        fn record(&self, session: &Session) {
            self.0.lock().unwrap().push(session.credential_id().to_string());
        }

        fn accounts(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn transient() -> ScrapeError {
        ScrapeError::RateLimited("please wait a few minutes".into())
    }

    #[tokio::test]
    async fn failing_pool_makes_exactly_n_login_attempts() {
        for n in 1..=4 {
            let ids: Vec<String> = (0..n).map(|i| format!("acct{i}")).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let mut fake = FakeScraper::new();
            for id in &id_refs {
                fake = fake.failing_login(id);
            }
            let fake = Arc::new(fake);
            let exec = executor(fake.clone(), &id_refs);
            let calls = Calls::default();

            let err = exec
                .execute(|s| {
                    let calls = calls.clone();
                    async move {
                        calls.record(&s);
                        Ok::<_, ScrapeError>(())
                    }
                })
                .await
                .unwrap_err();

            assert_eq!(fake.logins().len(), n, "pool of {n}");
            assert!(calls.accounts().is_empty());
            match err {
                ExecuteError::Exhausted {
                    last: Failure::Session(Error::Exhausted { attempts, .. }),
                    ..
                } => assert_eq!(attempts, n),
                other => panic!("expected session exhaustion, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn terminal_on_first_attempt_stops_immediately() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a", "b"]);
        let calls = Calls::default();

        let err = exec
            .execute(|s| {
                let calls = calls.clone();
                async move {
                    calls.record(&s);
                    Err::<(), _>(ScrapeError::NotFound("profile ghost".into()))
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_terminal());
        assert_eq!(err.attempts(), 1);
        assert_eq!(fake.logins(), vec!["a"], "b must never be contacted");
        assert_eq!(calls.accounts(), vec!["a"]);
        // The session survives a terminal failure.
        assert_eq!(exec.cache().current().await.unwrap().credential_id(), "a");
    }

    #[tokio::test]
    async fn transient_failure_rotates_to_next_credential() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a", "b", "c"]);
        let calls = Calls::default();

        let err = exec
            .execute(|s| {
                let calls = calls.clone();
                async move {
                    calls.record(&s);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.accounts(), vec!["a", "b", "c"]);
        assert_eq!(fake.logins(), vec!["a", "b", "c"]);
        assert_eq!(err.attempts(), 3);
        assert!(matches!(
            err,
            ExecuteError::Exhausted {
                last: Failure::Operation(ScrapeError::RateLimited(_)),
                ..
            }
        ));
        assert!(exec.cache().current().await.is_none());
    }

    #[tokio::test]
    async fn terminal_after_retries_reports_attempt_count() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a", "b", "c"]);
        let calls = Calls::default();

        let err = exec
            .execute(|s| {
                let calls = calls.clone();
                async move {
                    calls.record(&s);
                    if s.credential_id() == "c" {
                        Err::<(), _>(ScrapeError::NotFound("profile ghost".into()))
                    } else {
                        Err(transient())
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_terminal());
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls.accounts(), vec!["a", "b", "c"]);
        assert!(err.to_string().contains("profile ghost"), "got: {err}");
    }

    #[tokio::test]
    async fn failed_login_falls_through_to_next_account() {
        let fake = Arc::new(FakeScraper::new().failing_login("a"));
        let exec = executor(fake.clone(), &["a", "b"]);

        let account = exec
            .execute(|s| async move { Ok::<_, ScrapeError>(s.credential_id().to_string()) })
            .await
            .unwrap();

        assert_eq!(account, "b");
        assert_eq!(fake.logins(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn single_account_exhausts_after_one_attempt() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a"]);
        let calls = Calls::default();

        let err = exec
            .execute(|s| {
                let calls = calls.clone();
                async move {
                    calls.record(&s);
                    Err::<(), _>(ScrapeError::Transport("connection reset".into()))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert_eq!(calls.accounts().len(), 1);
        assert_eq!(fake.logins().len(), 1);
        assert!(err.to_string().contains("connection reset"), "got: {err}");
    }

    #[tokio::test]
    async fn recovers_after_one_transient_failure() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a", "b"]);
        let calls = Calls::default();

        let account = exec
            .execute(|s| {
                let calls = calls.clone();
                async move {
                    calls.record(&s);
                    if s.credential_id() == "a" {
                        Err(transient())
                    } else {
                        Ok(s.credential_id().to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(account, "b");
        assert_eq!(calls.accounts(), vec!["a", "b"]);
        assert_eq!(exec.cache().current().await.unwrap().credential_id(), "b");
    }

    #[tokio::test]
    async fn successful_executions_reuse_cached_session() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a", "b"]);

        for _ in 0..3 {
            exec.execute(|_| async { Ok::<_, ScrapeError>(()) })
                .await
                .unwrap();
        }
        assert_eq!(fake.logins(), vec!["a"]);
    }

    #[tokio::test]
    async fn scraper_lookup_through_executor() {
        let fake = Arc::new(FakeScraper::new().missing_profile("ghost"));
        let exec = executor(fake.clone(), &["a", "b"]);
        let client = Arc::clone(exec.client());

        let profile = exec
            .execute(|s| {
                let client = Arc::clone(&client);
                async move { client.profile(s.handle(), "nasa").await }
            })
            .await
            .unwrap();
        assert_eq!(profile.username, "nasa");

        let err = exec
            .execute(|s| {
                let client = Arc::clone(&client);
                async move { client.profile(s.handle(), "ghost").await }
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Terminal {
                attempts: 1,
                error: ScrapeError::NotFound(_)
            }
        ));
        assert_eq!(fake.logins(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn operation_timeout_is_retryable() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a", "b"]);
        let calls = Calls::default();

        let account = exec
            .execute(|s| {
                let calls = calls.clone();
                async move {
                    calls.record(&s);
                    if s.credential_id() == "a" {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok::<_, ScrapeError>(s.credential_id().to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(account, "b");
        assert_eq!(calls.accounts(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reported_as_last_failure() {
        let exec = executor(Arc::new(FakeScraper::new()), &["a"]);

        let err = exec
            .execute(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ScrapeError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecuteError::Exhausted {
                attempts: 1,
                last: Failure::Timeout(_)
            }
        ));
    }

    #[tokio::test]
    async fn max_attempts_override_caps_attempts() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake.clone(), &["a", "b", "c"]).with_max_attempts(2);
        let calls = Calls::default();

        let err = exec
            .execute(|s| {
                let calls = calls.clone();
                async move {
                    calls.record(&s);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 2);
        assert_eq!(calls.accounts(), vec!["a", "b"]);
    }

    #[test]
    fn max_attempts_defaults_to_pool_size_and_floors_at_one() {
        let exec = executor(Arc::new(FakeScraper::new()), &["a", "b", "c"]);
        assert_eq!(exec.max_attempts(), 3);
        assert_eq!(exec.with_max_attempts(0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_executions_converge_on_one_login() {
        let fake = Arc::new(FakeScraper::new().login_delay(Duration::from_millis(50)));
        let exec = Arc::new(executor(fake.clone(), &["a", "b"]));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let exec = exec.clone();
                tokio::spawn(async move {
                    exec.execute(|s| async move {
                        Ok::<_, ScrapeError>(s.credential_id().to_string())
                    })
                    .await
                    .unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), "a");
        }
        assert_eq!(fake.logins(), vec!["a"]);
    }

    #[test]
    fn decide_transitions() {
        let retry: Decision<(), &str> = decide(1, 2, Attempt::Retryable(Failure::Operation("x")));
        assert!(matches!(retry, Decision::Retry(_)));

        let done: Decision<(), &str> = decide(2, 2, Attempt::Retryable(Failure::Operation("x")));
        assert!(matches!(
            done,
            Decision::Return(Err(ExecuteError::Exhausted { attempts: 2, .. }))
        ));

        let terminal: Decision<(), &str> = decide(3, 5, Attempt::Terminal("gone"));
        assert!(matches!(
            terminal,
            Decision::Return(Err(ExecuteError::Terminal {
                attempts: 3,
                error: "gone"
            }))
        ));

        let ok: Decision<u8, &str> = decide(3, 3, Attempt::Succeeded(7));
        assert!(matches!(ok, Decision::Return(Ok(7))));
    }

    #[tokio::test]
    async fn health_reports_pool_and_session() {
        let fake = Arc::new(FakeScraper::new());
        let exec = executor(fake, &["a", "b"]);

        let before = exec.health().await;
        assert_eq!(before["status"], "healthy");
        assert_eq!(before["pool_size"], 2);
        assert_eq!(before["backend"], "fake");
        assert!(before["session"].is_null());
        assert_eq!(before["session_state"], "empty");

        exec.execute(|_| async { Ok::<_, ScrapeError>(()) })
            .await
            .unwrap();
        let after = exec.health().await;
        assert_eq!(after["session"]["account"], "a");
        assert_eq!(after["session_state"], "ready");
        assert_eq!(after["cursor"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_answers_while_login_in_flight() {
        let fake = Arc::new(FakeScraper::new().login_delay(Duration::from_secs(3)));
        let exec = Arc::new(executor(fake, &["a", "b", "c"]));

        let running = tokio::spawn({
            let exec = exec.clone();
            async move {
                exec.execute(|_| async { Ok::<_, ScrapeError>(()) })
                    .await
                    .unwrap()
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        let health = tokio::time::timeout(Duration::from_secs(1), exec.health())
            .await
            .expect("health must not wait behind the login");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(health["session_state"], "building");
        assert!(health["session"].is_null());
        assert_eq!(health["pool_size"], 3);

        running.await.unwrap();
        assert_eq!(exec.health().await["session_state"], "ready");
    }

    #[tokio::test]
    async fn health_degrades_after_exhaustion() {
        let exec = executor(Arc::new(FakeScraper::new().failing_login("a")), &["a"]);

        exec.execute(|_| async { Ok::<_, ScrapeError>(()) })
            .await
            .unwrap_err();
        let health = exec.health().await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["consecutive_exhausted"], 1);
    }

    #[test]
    fn execute_records_attempt_and_execution_counters() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let exec = executor(Arc::new(FakeScraper::new()), &["a", "b"]);
            exec.execute(|s| async move {
                if s.credential_id() == "a" {
                    Err(transient())
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();
        });

        let output = handle.render();
        assert!(output.contains("failover_attempts_total"), "got: {output}");
        assert!(output.contains("outcome=\"retryable\""), "got: {output}");
        assert!(output.contains("failover_executions_total"), "got: {output}");
        assert!(output.contains("outcome=\"success\""), "got: {output}");
    }
}
