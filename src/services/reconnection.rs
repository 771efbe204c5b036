use crate::adapters::metrics::MetricsHook;
use crate::adapters::proxy::ProxyHandlerFactory;
use crate::adapters::transport::Connector;
use crate::domain::endpoint::Endpoint;
use crate::error::{BuildError, ConnectError};
use crate::services::auth_service::AuthService;
use crate::services::connection::{CloseReason, Connection};
use backon::Retryable;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Shutdown has begun. Terminal.
    Draining,
}

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Total attempts per connect cycle, `None` for unbounded.
    pub max_attempts: Option<usize>,
    /// Fraction of each delay that may be shaved off at random, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: None,
            jitter: 0.2,
        }
    }
}

impl ReconnectionPolicy {
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: Option<usize>) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// # Errors
    /// Returns `BuildError::InvalidPolicy` describing the first offending field.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(BuildError::InvalidPolicy(format!("multiplier must be at least 1.0, got {}", self.multiplier)));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(BuildError::InvalidPolicy(format!("jitter must be in [0, 1), got {}", self.jitter)));
        }
        if self.initial_delay > self.max_delay {
            return Err(BuildError::InvalidPolicy("initial delay exceeds the maximum delay".to_string()));
        }
        if self.max_attempts == Some(0) {
            return Err(BuildError::InvalidPolicy("at least one attempt is required".to_string()));
        }
        Ok(())
    }

    /// Delays to wait between the attempts of one connect cycle.
    #[must_use]
    pub fn backoff(&self) -> ReconnectionBackoff {
        ReconnectionBackoff {
            policy: self.clone(),
            next_base: self.initial_delay,
            previous: Duration::ZERO,
            yielded: 0,
        }
    }
}

/// Iterator over retry delays. Non-decreasing, never above `max_delay`, and
/// exhausted after `max_attempts - 1` delays.
#[derive(Debug, Clone)]
pub struct ReconnectionBackoff {
    policy: ReconnectionPolicy,
    next_base: Duration,
    previous: Duration,
    yielded: usize,
}

impl Iterator for ReconnectionBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.policy.max_attempts.is_some_and(|max| self.yielded + 1 >= max) {
            return None;
        }

        let max_delay = self.policy.max_delay;
        let base = self.next_base.min(max_delay);
        self.next_base = Duration::try_from_secs_f64(base.as_secs_f64() * self.policy.multiplier)
            .map_or(max_delay, |next| next.min(max_delay));

        let jittered = if self.policy.jitter > 0.0 {
            let shave = self.policy.jitter * rand::thread_rng().r#gen::<f64>();
            base.mul_f64(1.0 - shave)
        } else {
            base
        };
        let delay = jittered.max(self.previous).min(max_delay);

        self.previous = delay;
        self.yielded += 1;
        Some(delay)
    }
}

type SharedAttempt = Shared<BoxFuture<'static, Result<(), ConnectError>>>;

struct Attempt {
    outcome: SharedAttempt,
    task: AbortHandle,
}

impl std::fmt::Debug for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attempt").field("task", &self.task).finish_non_exhaustive()
    }
}

/// Owns the single current [`Connection`] and replaces it after loss.
///
/// At most one connect cycle runs at a time; every caller of
/// [`connect`](Self::connect) and every loss signal joins the cycle in flight.
#[derive(Debug, Clone)]
pub struct ReconnectionManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    connector: Arc<dyn Connector>,
    auth: Arc<AuthService>,
    proxy: Option<Arc<dyn ProxyHandlerFactory>>,
    metrics: MetricsHook,
    policy: ReconnectionPolicy,
    endpoint: Mutex<Option<Endpoint>>,
    current: RwLock<Option<Arc<Connection>>>,
    state: watch::Sender<ConnectionState>,
    generation: watch::Sender<u64>,
    gave_up: watch::Sender<Option<ConnectError>>,
    attempt: Mutex<Option<Attempt>>,
    draining: CancellationToken,
    watchers: TaskTracker,
    next_connection_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReconnectionManager {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        auth: Arc<AuthService>,
        proxy: Option<Arc<dyn ProxyHandlerFactory>>,
        metrics: MetricsHook,
        policy: ReconnectionPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (generation, _) = watch::channel(0);
        let (gave_up, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                connector,
                auth,
                proxy,
                metrics,
                policy,
                endpoint: Mutex::new(None),
                current: RwLock::new(None),
                state,
                generation,
                gave_up,
                attempt: Mutex::new(None),
                draining: CancellationToken::new(),
                watchers: TaskTracker::new(),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    /// Connects to `endpoint`, retrying per the policy. Resolves on the first
    /// transition into `Connected`. Returns immediately if already connected.
    ///
    /// # Errors
    /// `AttemptsExhausted` when the policy gives up, `ShuttingDown` when the
    /// client drains first, or the permanent error that stopped the cycle.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ConnectError> {
        if self.inner.draining.is_cancelled() {
            return Err(ConnectError::ShuttingDown);
        }
        if self.current().is_some() {
            return Ok(());
        }
        *lock(&self.inner.endpoint) = Some(endpoint);
        Inner::ensure_attempt(&self.inner).await
    }

    /// Resolves on the next transition into `Connected` after this call, or
    /// with the error of the next connect cycle that gives up.
    ///
    /// The subscription is taken when this method is called, not when the
    /// future is first polled, so a reconnection in between is not missed.
    #[must_use]
    pub fn reconnection_future(&self) -> BoxFuture<'static, Result<(), ConnectError>> {
        let mut generation = self.inner.generation.subscribe();
        let mut gave_up = self.inner.gave_up.subscribe();
        let draining = self.inner.draining.clone();
        async move {
            let failure = async {
                match gave_up.changed().await {
                    Ok(()) => gave_up.borrow_and_update().clone().unwrap_or(ConnectError::ShuttingDown),
                    Err(_) => ConnectError::ShuttingDown,
                }
            };
            tokio::select! {
                changed = generation.changed() => changed.map_err(|_| ConnectError::ShuttingDown),
                error = failure => Err(error),
                () = draining.cancelled() => Err(ConnectError::ShuttingDown),
            }
        }
        .boxed()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Stream of states, starting with the current one.
    #[must_use]
    pub fn state_changes(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.inner.state.subscribe())
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<Connection>> {
        self.inner.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs `f` against the current connection while holding the read lock, so
    /// the connection cannot be swapped out underneath it.
    pub(crate) fn with_current<R>(&self, f: impl FnOnce(&Arc<Connection>) -> R) -> Option<R> {
        let current = self.inner.current.read().unwrap_or_else(PoisonError::into_inner);
        current.as_ref().map(f)
    }

    /// Enters `Draining`, cancels any connect cycle and closes the current
    /// connection. Resolves once every connection this manager opened has
    /// failed or resolved its pending submissions.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if !inner.draining.is_cancelled() {
            tracing::info!("Shutting down gateway connection");
        }
        inner.draining.cancel();
        inner.state.send_replace(ConnectionState::Draining);

        if let Some(attempt) = lock(&inner.attempt).take() {
            attempt.task.abort();
        }

        let connection = inner.current.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(connection) = connection {
            connection.close().await;
        }

        inner.watchers.close();
        inner.watchers.wait().await;
    }
}

impl Inner {
    /// Joins the connect cycle in flight or starts a new one.
    fn ensure_attempt(self: &Arc<Self>) -> SharedAttempt {
        let mut slot = lock(&self.attempt);
        if let Some(attempt) = slot.as_ref().filter(|attempt| !attempt.task.is_finished()) {
            return attempt.outcome.clone();
        }

        let task = tokio::spawn(Arc::clone(self).run_cycle().instrument(tracing::info_span!("connect_cycle")));
        let handle = task.abort_handle();
        let outcome = async move {
            task.await.unwrap_or_else(|e| {
                Err(if e.is_cancelled() { ConnectError::ShuttingDown } else { ConnectError::Aborted(e.to_string()) })
            })
        }
        .boxed()
        .shared();

        *slot = Some(Attempt { outcome: outcome.clone(), task: handle });
        outcome
    }

    async fn run_cycle(self: Arc<Self>) -> Result<(), ConnectError> {
        let Some(endpoint) = lock(&self.endpoint).clone() else {
            return Err(ConnectError::Aborted("no endpoint configured".to_string()));
        };

        let attempts = AtomicUsize::new(0);
        let retry = (|| async {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.attempt(&endpoint).await
        })
        .retry(self.policy.backoff())
        .when(|e: &ConnectError| e.is_retryable() && !self.draining.is_cancelled())
        .notify(|e: &ConnectError, delay: Duration| {
            tracing::warn!(error = %e, ?delay, "Connection attempt failed, retrying");
        });

        let result = tokio::select! {
            result = retry => result,
            () = self.draining.cancelled() => Err(ConnectError::ShuttingDown),
        };

        let error = match result {
            Ok(()) => return Ok(()),
            Err(_) if self.draining.is_cancelled() => return Err(ConnectError::ShuttingDown),
            Err(e) if e.is_retryable() => {
                let attempts = attempts.load(Ordering::Relaxed);
                tracing::error!(attempts, error = %e, "Giving up on connecting to the gateway");
                ConnectError::AttemptsExhausted { attempts, last: Box::new(e) }
            }
            Err(e) => {
                tracing::error!(error = %e, "Connection failed permanently");
                e
            }
        };
        self.gave_up.send_replace(Some(error.clone()));
        Err(error)
    }

    async fn attempt(self: &Arc<Self>, endpoint: &Endpoint) -> Result<(), ConnectError> {
        if self.draining.is_cancelled() {
            return Err(ConnectError::ShuttingDown);
        }
        self.set_state(ConnectionState::Connecting);
        self.metrics.fire(|m| m.on_connection_attempt());

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let opened = Connection::open(
            id,
            endpoint.clone(),
            self.connector.as_ref(),
            Arc::clone(&self.auth),
            self.proxy.as_ref(),
            self.metrics.clone(),
        )
        .await;

        match opened {
            Ok(connection) => {
                self.metrics.fire(|m| m.on_connection_succeeded());
                if self.install(&connection) {
                    Ok(())
                } else {
                    connection.close().await;
                    Err(ConnectError::ShuttingDown)
                }
            }
            Err(e) => {
                self.metrics.fire(|m| m.on_connection_failed());
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Makes `connection` current unless shutdown has begun.
    fn install(self: &Arc<Self>, connection: &Arc<Connection>) -> bool {
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if self.draining.is_cancelled() {
                return false;
            }
            *current = Some(Arc::clone(connection));
            self.set_state(ConnectionState::Connected);
        }
        self.generation.send_modify(|generation| *generation += 1);

        let manager = Arc::clone(self);
        let watched = Arc::clone(connection);
        self.watchers.spawn(
            async move { manager.watch(watched).await }
                .instrument(tracing::debug_span!("connection_watch", connection_id = connection.id())),
        );
        true
    }

    async fn watch(self: Arc<Self>, connection: Arc<Connection>) {
        let CloseReason::Lost(cause) = connection.closed().await else {
            return;
        };

        let was_current = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &connection)) {
                *current = None;
                true
            } else {
                false
            }
        };
        if !was_current || self.draining.is_cancelled() {
            return;
        }

        tracing::warn!(endpoint = %connection.endpoint(), error = %cause, "Connection to gateway lost, reconnecting");
        self.set_state(ConnectionState::Disconnected);
        // Outcome reaches waiters through `reconnection_future`.
        drop(self.ensure_attempt());
    }

    /// `Draining` is terminal; every other transition goes through here.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Draining || *state == next {
                return false;
            }
            tracing::debug!(from = ?*state, to = ?next, "Connection state changed");
            *state = next;
            true
        });
    }
}
