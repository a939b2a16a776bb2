//! Builder for configuring and launching the auto-save worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::SaveError;
use crate::handle::{AutoSaveCoordinator, Shared};
use crate::handler::SaveHandler;
use crate::outcome::SaveOutcome;
use crate::request::SaveType;
use crate::status::SaveStatus;
use crate::worker::{self, Hooks};

/// Default quiet period before a scheduled save is flushed.
pub const DEFAULT_DEBOUNCE_TIME: Duration = Duration::from_millis(1000);

/// Default upper bound on how long a burst of schedules can delay a flush.
pub const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_millis(5000);

/// Builder for configuring and starting an [`AutoSaveCoordinator`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use subtitle_saver::{CoordinatorBuilder, Result, SaveHandler, SaveOutcome, SavePayload};
///
/// # struct Backend;
/// # impl SaveHandler for Backend {
/// #     async fn save(&self, _: &SavePayload) -> Result<SaveOutcome> { Ok(SaveOutcome::succeeded(None)) }
/// # }
/// # async fn example() {
/// let coordinator = CoordinatorBuilder::new(Backend)
///     .debounce_time(Duration::from_millis(500))
///     .max_wait_time(Duration::from_secs(3))
///     .on_status_change(|status| println!("status: {status}"))
///     .on_error(|err| eprintln!("save failed: {err}"))
///     .build();
///
/// coordinator.schedule(SavePayload::project_name("Episode 1"));
/// # }
/// ```
pub struct CoordinatorBuilder<H: SaveHandler> {
    handler: H,
    debounce_time: Duration,
    max_wait_time: Duration,
    hooks: Hooks,
}

impl<H: SaveHandler> CoordinatorBuilder<H> {
    /// Create a new builder around the given save handler.
    ///
    /// Defaults: debounce 1 s, max wait 5 s, no callbacks.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            debounce_time: DEFAULT_DEBOUNCE_TIME,
            max_wait_time: DEFAULT_MAX_WAIT_TIME,
            hooks: Hooks::default(),
        }
    }

    /// Quiet period after the last `schedule` before the save is flushed.
    pub fn debounce_time(mut self, debounce: Duration) -> Self {
        self.debounce_time = debounce;
        self
    }

    /// Ceiling measured from the first `schedule` of a burst.
    pub fn max_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait_time = max_wait;
        self
    }

    /// Called from the worker on every status transition.
    pub fn on_status_change(mut self, f: impl Fn(SaveStatus) + Send + Sync + 'static) -> Self {
        self.hooks.on_status_change = Some(Arc::new(f));
        self
    }

    /// Called for every failed flush, whether it was scheduled or immediate.
    pub fn on_error(mut self, f: impl Fn(&SaveError) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(f));
        self
    }

    /// Called after every successful flush with the backend outcome.
    pub fn on_saved(
        mut self,
        f: impl Fn(SaveType, &SaveOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_saved = Some(Arc::new(f));
        self
    }

    /// Consume the builder, spawn the background worker, and return the
    /// [`AutoSaveCoordinator`] handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> AutoSaveCoordinator {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        tokio::spawn(worker::run(
            rx,
            self.handler,
            self.hooks,
            Arc::clone(&shared),
            self.debounce_time,
            self.max_wait_time,
        ));

        AutoSaveCoordinator::new(tx, shared)
    }
}

/// Timing options for the service's auto-save coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    pub debounce_time: Duration,
    pub max_wait_time: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            debounce_time: DEFAULT_DEBOUNCE_TIME,
            max_wait_time: DEFAULT_MAX_WAIT_TIME,
        }
    }
}

impl ServiceOptions {
    pub fn debounce_time(mut self, debounce: Duration) -> Self {
        self.debounce_time = debounce;
        self
    }

    pub fn max_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait_time = max_wait;
        self
    }
}
