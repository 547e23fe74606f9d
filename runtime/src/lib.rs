//! # Rollcall Runtime
//!
//! Runtime implementation for the Rollcall registration engine.
//!
//! ## Core Components
//!
//! - **Store**: Owns one piece of state, runs the reducer under an exclusive lock and
//!   executes the returned effects (the feedback loop)
//! - **Retry / Dead letters**: Exponential backoff for operations that must eventually
//!   succeed, and a bounded queue for the ones that did not
//! - **In-memory event bus**: Topic-based pub/sub for notifications
//! - **Metrics**: Prometheus exporter
//!
//! ## Serialization model
//!
//! Each `Store` is a single writer: actions sent to the same store are reduced one at a
//! time, in the order they acquire the lock. Different stores never share a lock, so
//! work on different keys proceeds in parallel.
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//! store.send(Action::DoSomething).await?;
//! let value = store.state(|s| s.some_field).await;
//! ```

use rollcall_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Retry logic with exponential backoff
pub mod retry;

/// Bounded queue for operations that exhausted their retries
pub mod dead_letter;

/// In-process topic bus
pub mod event_bus;

/// Prometheus metrics for observability
pub mod metrics;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use event_bus::InMemoryEventBus;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use store::Store;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for a reply action
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Configuration for Store instances
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of actions buffered for observers before slow ones start lagging
    pub broadcast_capacity: usize,
    /// Default timeout for graceful shutdown
    pub default_shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(broadcast_capacity: usize, default_shutdown_timeout: Duration) -> Self {
        Self {
            broadcast_capacity,
            default_shutdown_timeout,
        }
    }

    /// Set the broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
            default_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Decrements the pending-effect counter when an effect task finishes (or panics)
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store module - the runtime coordinator for a reducer
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, Mutex, Ordering, PendingGuard, Reducer,
        StoreConfig, StoreError,
    };
    use std::future::Future;
    use std::pin::Pin;
    use tokio::sync::broadcast;
    use tokio::sync::broadcast::error::RecvError;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind a `Mutex`: one writer at a time)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<Mutex<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        default_shutdown_timeout: Duration,
        /// Every action produced by an effect is broadcast here before it is reduced.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                default_shutdown_timeout: self.default_shutdown_timeout,
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Send + Clone + std::fmt::Debug + 'static,
        S: Send + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with default configuration
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new Store with custom configuration
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

            Self {
                state: Arc::new(Mutex::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                default_shutdown_timeout: config.default_shutdown_timeout,
                action_broadcast,
            }
        }

        /// Send an action to the store
        ///
        /// The reducer runs while holding the state lock; effects are started after the
        /// lock is released.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] once shutdown has begun.
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(StoreError::ShutdownInProgress);
            }

            tracing::trace!(?action, "Reducing action");
            let effects = {
                let mut state = self.state.lock().await;
                self.reducer.reduce(&mut state, action, &self.environment)
            };
            metrics::counter!("store.actions.reduced").increment(1);

            for effect in effects {
                self.execute_effect(effect);
            }
            Ok(())
        }

        /// Send an action and wait for a matching reply action
        ///
        /// Subscribes to the action broadcast BEFORE sending, so a reply produced by an
        /// effect cannot be missed. Use correlation IDs in the predicate to tell
        /// concurrent requests apart.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: no matching action before `timeout`
        /// - [`StoreError::ChannelClosed`]: broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();
            self.send(action).await?;

            let wait = async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Reply observer lagged behind store broadcast");
                        },
                        Err(RecvError::Closed) => return Err(StoreError::ChannelClosed),
                    }
                }
            };

            tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to actions produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read a value out of the current state
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.lock().await;
            f(&*state)
        }

        /// Number of effects still running
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::SeqCst)
        }

        /// Stop accepting actions and wait for running effects to drain
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still running after `timeout`.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            self.shutdown.store(true, Ordering::SeqCst);
            let deadline = tokio::time::Instant::now() + timeout;

            loop {
                let pending = self.pending_effects();
                if pending == 0 {
                    tracing::debug!("Store drained");
                    return Ok(());
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(pending, "Store shutdown timed out");
                    return Err(StoreError::ShutdownTimeout(pending));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        /// Shut down using the configured default timeout
        ///
        /// # Errors
        ///
        /// See [`Store::shutdown`].
        pub async fn shutdown_default(&self) -> Result<(), StoreError> {
            self.shutdown(self.default_shutdown_timeout).await
        }

        /// Start an effect in the background
        fn execute_effect(&self, effect: Effect<A>) {
            if matches!(effect, Effect::None) {
                metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                return;
            }

            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            let guard = PendingGuard(Arc::clone(&self.pending_effects));
            let store = self.clone();

            tokio::spawn(async move {
                let _guard = guard;
                store.run_effect(effect).await;
            });
        }

        /// Feed an action produced by an effect back into the store
        async fn feed_back(&self, action: A) {
            // No receivers is fine: nobody is waiting for this reply
            let _ = self.action_broadcast.send(action.clone());
            if let Err(error) = self.send(action).await {
                tracing::debug!(%error, "Dropped feedback action");
            }
        }

        /// Run an effect to completion
        ///
        /// - `Future`: awaited, resulting action (if any) fed back
        /// - `Delay`: sleeps, then feeds the action back
        /// - `Dispatch`: feeds the action back immediately
        /// - `Parallel`: each child started independently
        /// - `Sequential`: children run one after another
        fn run_effect(&self, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Future(fut) => {
                        metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                        if let Some(action) = fut.await {
                            self.feed_back(action).await;
                        }
                    },
                    Effect::Delay { duration, action } => {
                        metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                        tokio::time::sleep(duration).await;
                        self.feed_back(*action).await;
                    },
                    Effect::Dispatch(action) => {
                        metrics::counter!("store.effects.executed", "type" => "dispatch").increment(1);
                        self.feed_back(*action).await;
                    },
                    Effect::Parallel(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                        for effect in effects {
                            self.execute_effect(effect);
                        }
                    },
                    Effect::Sequential(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);
                        for effect in effects {
                            self.run_effect(effect).await;
                        }
                    },
                }
            })
        }
    }
}
