//! Background worker that debounces, coalesces and flushes save requests.
//!
//! This module is internal -- users interact with it indirectly through
//! [`AutoSaveCoordinator`](crate::AutoSaveCoordinator).
//!
//! Every piece of coordinator state lives here and is touched only from the
//! worker loop. Outbound saves run on spawned tasks and report back over the
//! completion channel.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::error::{Result, SaveError};
use crate::handle::Shared;
use crate::handler::SaveHandler;
use crate::outcome::SaveOutcome;
use crate::registry::panic_message;
use crate::request::{SaveRequest, SaveType};
use crate::status::SaveStatus;

pub(crate) type StatusHook = Arc<dyn Fn(SaveStatus) + Send + Sync>;
pub(crate) type ErrorHook = Arc<dyn Fn(&SaveError) + Send + Sync>;
pub(crate) type SavedHook = Arc<dyn Fn(SaveType, &SaveOutcome) + Send + Sync>;

type Waiter = oneshot::Sender<Result<SaveOutcome>>;

#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) on_status_change: Option<StatusHook>,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_saved: Option<SavedHook>,
}

pub(crate) enum Command {
    Schedule(SaveRequest),
    SaveNow(SaveRequest, Waiter),
    HasPending(oneshot::Sender<bool>),
    /// An error raised before the request could be queued.
    Report(SaveError),
    Destroy,
}

struct Completion {
    save_type: SaveType,
    result: Result<SaveOutcome>,
    waiters: Vec<Waiter>,
}

impl Completion {
    fn answer(self) {
        for waiter in self.waiters {
            let _ = waiter.send(self.result.clone());
        }
    }
}

/// Pending state for one [`SaveType`].
#[derive(Default)]
struct Slot {
    pending: Option<SaveRequest>,
    waiters: Vec<Waiter>,
    debounce_at: Option<Instant>,
    max_wait_at: Option<Instant>,
    /// Flush as soon as the in-flight save resolves.
    ready: bool,
    in_flight: bool,
}

impl Slot {
    fn clear_timers(&mut self) {
        self.debounce_at = None;
        self.max_wait_at = None;
    }

    fn deadline(&self) -> Option<Instant> {
        match (self.debounce_at, self.max_wait_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.pending.is_some() && self.deadline().is_some_and(|d| d <= now)
    }

    fn has_pending(&self) -> bool {
        self.pending.is_some() || self.debounce_at.is_some() || self.max_wait_at.is_some()
    }
}

struct Worker<H> {
    handler: Arc<H>,
    hooks: Hooks,
    shared: Arc<Shared>,
    done_tx: mpsc::UnboundedSender<Completion>,
    debounce_time: Duration,
    max_wait_time: Duration,
    slots: HashMap<SaveType, Slot>,
    status: SaveStatus,
}

pub(crate) async fn run<H: SaveHandler>(
    mut commands: mpsc::UnboundedReceiver<Command>,
    handler: H,
    hooks: Hooks,
    shared: Arc<Shared>,
    debounce_time: Duration,
    max_wait_time: Duration,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut worker = Worker {
        handler: Arc::new(handler),
        hooks,
        shared,
        done_tx,
        debounce_time,
        max_wait_time,
        slots: HashMap::new(),
        status: SaveStatus::Idle,
    };

    loop {
        let deadline = worker.next_deadline();

        tokio::select! {
            biased;

            cmd = commands.recv() => match cmd {
                Some(Command::Schedule(request)) => {
                    worker.schedule(request);
                    worker.publish_pending();
                    worker.shared.dequeue();
                }
                Some(Command::SaveNow(request, waiter)) => worker.save_now(request, waiter),
                Some(Command::HasPending(reply)) => {
                    let _ = reply.send(worker.has_pending());
                }
                Some(Command::Report(err)) => worker.report(&err),
                Some(Command::Destroy) | None => {
                    worker.shutdown();
                    return;
                }
            },

            Some(done) = done_rx.recv() => worker.complete(done),

            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                worker.flush_due(Instant::now());
            }
        }
        worker.publish_pending();
    }
}

impl<H: SaveHandler> Worker<H> {
    fn schedule(&mut self, request: SaveRequest) {
        let now = Instant::now();
        let save_type = request.save_type();
        let (debounce, max_wait) = (self.debounce_time, self.max_wait_time);
        let slot = self.slots.entry(save_type).or_default();

        slot.pending = Some(request);
        if !slot.ready {
            slot.debounce_at = Some(now + debounce);
            slot.max_wait_at.get_or_insert(now + max_wait);
        }
        tracing::trace!(%save_type, "Save scheduled");

        if self.status != SaveStatus::Saving {
            self.set_status(SaveStatus::Pending);
        }
    }

    fn report(&self, err: &SaveError) {
        tracing::warn!("Deferred save rejected: {err}");
        if let Some(hook) = self.hooks.on_error.clone() {
            self.guarded("on_error", || hook(err));
        }
    }

    fn save_now(&mut self, request: SaveRequest, waiter: Waiter) {
        let save_type = request.save_type();
        let slot = self.slots.entry(save_type).or_default();

        slot.pending = Some(request);
        slot.waiters.push(waiter);
        slot.clear_timers();
        slot.ready = true;

        if !slot.in_flight {
            self.dispatch(save_type);
        }
    }

    fn flush_due(&mut self, now: Instant) {
        let due: Vec<SaveType> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_due(now))
            .map(|(t, _)| *t)
            .collect();

        for save_type in due {
            let Some(slot) = self.slots.get_mut(&save_type) else {
                continue;
            };
            slot.clear_timers();
            if slot.in_flight {
                slot.ready = true;
            } else {
                self.dispatch(save_type);
            }
        }
    }

    /// Promote the pending request of `save_type` to in-flight.
    fn dispatch(&mut self, save_type: SaveType) {
        let Some(slot) = self.slots.get_mut(&save_type) else {
            return;
        };
        let Some(request) = slot.pending.take() else {
            return;
        };
        let waiters = std::mem::take(&mut slot.waiters);
        slot.clear_timers();
        slot.ready = false;
        slot.in_flight = true;

        tracing::debug!(
            %save_type,
            waited_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "Flushing save"
        );
        self.set_status(SaveStatus::Saving);

        let handler = Arc::clone(&self.handler);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(handler.save(&request.payload))
                .catch_unwind()
                .await
            {
                Ok(result) => result.and_then(SaveOutcome::into_result),
                Err(panic) => Err(SaveError::Transport(format!(
                    "save handler panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            let done = Completion {
                save_type,
                result,
                waiters,
            };
            // Worker gone: only the callers waiting on this save hear about it.
            if let Err(mpsc::error::SendError(done)) = done_tx.send(done) {
                done.answer();
            }
        });
    }

    fn complete(&mut self, done: Completion) {
        let save_type = done.save_type;
        if let Some(slot) = self.slots.get_mut(&save_type) {
            slot.in_flight = false;
        }

        match &done.result {
            Ok(outcome) => {
                tracing::debug!(%save_type, "Save completed");
                self.shared.mark_saved(Utc::now());
                self.set_status(SaveStatus::Saved);
                if let Some(hook) = self.hooks.on_saved.clone() {
                    self.guarded("on_saved", || hook(save_type, outcome));
                }
            }
            Err(e) => {
                tracing::error!(%save_type, "Save failed: {e}");
                self.set_status(SaveStatus::Error);
                if let Some(hook) = self.hooks.on_error.clone() {
                    self.guarded("on_error", || hook(e));
                }
            }
        }
        done.answer();

        if self
            .slots
            .get(&save_type)
            .is_some_and(|slot| slot.ready && slot.pending.is_some())
        {
            self.dispatch(save_type);
        }
        self.settle();
    }

    /// Pick the status that reflects the remaining work.
    fn settle(&mut self) {
        let next = if self.slots.values().any(|s| s.in_flight) {
            SaveStatus::Saving
        } else if self.has_pending() {
            SaveStatus::Pending
        } else if self.status == SaveStatus::Error {
            SaveStatus::Error
        } else {
            SaveStatus::Idle
        };
        self.set_status(next);
    }

    fn set_status(&mut self, status: SaveStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.shared.status.send_replace(status);
        if let Some(hook) = self.hooks.on_status_change.clone() {
            self.guarded("on_status_change", || hook(status));
        }
    }

    /// Run a user callback unless the coordinator was destroyed; panics are logged.
    fn guarded(&self, hook: &'static str, f: impl FnOnce()) {
        if !self.shared.is_alive() {
            return;
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
            tracing::error!(hook, "Callback panicked: {}", panic_message(panic.as_ref()));
        }
    }

    fn has_pending(&self) -> bool {
        self.slots.values().any(Slot::has_pending)
    }

    fn publish_pending(&self) {
        self.shared.set_worker_pending(self.has_pending());
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().filter_map(Slot::deadline).min()
    }

    fn shutdown(&mut self) {
        self.shared.kill();
        let dropped = self.slots.values().filter(|s| s.pending.is_some()).count();
        self.slots.clear();
        self.shared.set_worker_pending(false);
        self.hooks = Hooks::default();
        tracing::info!(dropped, "Auto-save coordinator destroyed");
    }
}
