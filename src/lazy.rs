//! Single-flight lazy initialization.
//!
//! A [`LazyResource`] starts `Uninitialized`. The first caller of
//! [`LazyResource::get_or_init`] flips it to `Initializing` and spawns the
//! initializer on its own task; everyone arriving while that runs parks on a
//! [`Notify`] and receives the same outcome. `Ready` and `Failed` are both
//! terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, error};

use crate::InitError;

/// Observable lifecycle of a [`LazyResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InitPhase::Uninitialized => "uninitialized",
            InitPhase::Initializing => "initializing",
            InitPhase::Ready => "ready",
            InitPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

enum State<T: ?Sized> {
    Uninitialized,
    Initializing,
    Ready(Arc<T>),
    Failed(InitError),
}

/// Guarded, explicitly stateful replacement for "init if needed".
pub struct LazyResource<T: ?Sized> {
    name: &'static str,
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> fmt::Debug for LazyResource<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResource")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish()
    }
}

impl<T> LazyResource<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State::Uninitialized),
            notify: Notify::new(),
        }
    }

    /// A cell that is already `Ready`.
    pub fn ready(name: &'static str, value: Arc<T>) -> Self {
        Self {
            name,
            state: Mutex::new(State::Ready(value)),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> InitPhase {
        match &*self.lock_state() {
            State::Uninitialized => InitPhase::Uninitialized,
            State::Initializing => InitPhase::Initializing,
            State::Ready(_) => InitPhase::Ready,
            State::Failed(_) => InitPhase::Failed,
        }
    }

    /// The value if initialization already succeeded.
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.lock_state() {
            State::Ready(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Returns the value, running `init` first if nobody has yet.
    ///
    /// `init` runs at most once per cell. It executes on a spawned task, so
    /// dropping the caller's future does not leave the cell stuck in
    /// `Initializing`.
    pub async fn get_or_init<F, Fut>(self: &Arc<Self>, init: F) -> Result<Arc<T>, InitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, InitError>> + Send + 'static,
    {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let claimed = {
                let mut state = self.lock_state();
                match &*state {
                    State::Ready(value) => return Ok(Arc::clone(value)),
                    State::Failed(err) => return Err(err.clone()),
                    State::Initializing => {
                        // Register before releasing the lock so a settle in
                        // between is not missed.
                        notified.as_mut().enable();
                        false
                    }
                    State::Uninitialized => {
                        *state = State::Initializing;
                        true
                    }
                }
            };

            if claimed {
                return self.drive(init()).await;
            }
            notified.await;
        }
    }

    async fn drive<Fut>(self: &Arc<Self>, init: Fut) -> Result<Arc<T>, InitError>
    where
        Fut: Future<Output = Result<Arc<T>, InitError>> + Send + 'static,
    {
        let name = self.name;
        debug!(resource = name, "lazy_init_started");

        let this = Arc::clone(self);
        let supervisor = tokio::spawn(async move {
            let start = Instant::now();
            let outcome = match tokio::spawn(init).await {
                Ok(outcome) => outcome,
                Err(join) => Err(InitError {
                    resource: name,
                    reason: format!("initializer task failed: {join}"),
                }),
            };
            let elapsed_micros = start.elapsed().as_micros() as u64;
            match &outcome {
                Ok(_) => debug!(resource = name, elapsed_micros, "lazy_init_ready"),
                Err(err) => error!(
                    resource = name,
                    error = %err.reason,
                    elapsed_micros,
                    "lazy_init_failed"
                ),
            }
            this.settle(&outcome);
            outcome
        });

        match supervisor.await {
            Ok(outcome) => outcome,
            Err(join) => {
                let err = InitError {
                    resource: name,
                    reason: format!("initializer task failed: {join}"),
                };
                self.settle(&Err(err.clone()));
                Err(err)
            }
        }
    }

    fn settle(&self, outcome: &Result<Arc<T>, InitError>) {
        {
            let mut state = self.lock_state();
            if matches!(*state, State::Initializing) {
                *state = match outcome {
                    Ok(value) => State::Ready(Arc::clone(value)),
                    Err(err) => State::Failed(err.clone()),
                };
            }
        }
        self.notify.notify_waiters();
    }

    fn lock_state(&self) -> MutexGuard<'_, State<T>> {
        // The state is always left consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
