//! The [`AutoSaveCoordinator`] handle used to submit saves and observe status.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Result, SaveError};
use crate::outcome::SaveOutcome;
use crate::request::{SavePayload, SaveRequest};
use crate::status::SaveStatus;
use crate::worker::Command;

/// State shared between the handle and the worker.
pub(crate) struct Shared {
    alive: AtomicBool,
    last_saved_at: Mutex<Option<DateTime<Utc>>>,
    pub(crate) status: watch::Sender<SaveStatus>,
    /// Schedules sent but not yet applied by the worker.
    queued: AtomicUsize,
    /// Worker-side pending flag, refreshed after every loop iteration.
    worker_pending: AtomicBool,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            last_saved_at: Mutex::new(None),
            status: watch::channel(SaveStatus::Idle).0,
            queued: AtomicUsize::new(0),
            worker_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that flipped the flag.
    pub(crate) fn kill(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_saved(&self, at: DateTime<Utc>) {
        *self
            .last_saved_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// Called by the worker once a queued schedule has been applied.
    pub(crate) fn dequeue(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn set_worker_pending(&self, pending: bool) {
        self.worker_pending.store(pending, Ordering::SeqCst);
    }

    fn has_pending(&self) -> bool {
        // queued first: the worker clears it only after publishing its flag
        self.queued.load(Ordering::SeqCst) > 0 || self.worker_pending.load(Ordering::SeqCst)
    }

    fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_saved_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by [`CoordinatorBuilder::build`](crate::CoordinatorBuilder::build).
///
/// Commands are processed by the worker in the order they are issued, so a
/// [`has_pending_changes`](Self::has_pending_changes) query always observes
/// every `schedule` made before it.
///
/// Dropping the handle has the same effect as [`destroy`](Self::destroy).
pub struct AutoSaveCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl AutoSaveCoordinator {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, shared: Arc<Shared>) -> Self {
        Self { commands, shared }
    }

    /// Queue `payload` for a debounced save.
    ///
    /// Replaces any pending payload of the same type and moves the status to
    /// [`SaveStatus::Pending`] before returning, unless a save is in flight.
    /// Never fails: problems with the eventual flush reach only the
    /// `on_error` callback.
    pub fn schedule(&self, payload: SavePayload) {
        if !self.shared.is_alive() {
            tracing::debug!("Ignoring schedule on destroyed coordinator");
            return;
        }
        // Published before the worker sees the request, so its later
        // transitions always land on top of this one.
        self.shared.status.send_if_modified(|status| {
            if matches!(status, SaveStatus::Pending | SaveStatus::Saving) {
                return false;
            }
            *status = SaveStatus::Pending;
            true
        });
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let request = SaveRequest::new(payload);
        if self.commands.send(Command::Schedule(request)).is_err() {
            self.shared.dequeue();
            tracing::debug!("Auto-save worker gone, dropping scheduled save");
        }
    }

    /// Hand an error that never reached the worker's queue to `on_error`.
    pub(crate) fn report_error(&self, err: SaveError) {
        if !self.shared.is_alive() {
            return;
        }
        let _ = self.commands.send(Command::Report(err));
    }

    /// Save `payload` right away and wait for the backend's answer.
    ///
    /// Cancels the debounce timers of the same type. If a save of that type is
    /// already in flight, this one is sent as soon as it resolves.
    pub async fn save_now(&self, payload: SavePayload) -> Result<SaveOutcome> {
        if !self.shared.is_alive() {
            return Err(SaveError::Destroyed);
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SaveNow(SaveRequest::new(payload), tx))
            .map_err(|_| SaveError::Destroyed)?;
        rx.await.unwrap_or(Err(SaveError::Destroyed))
    }

    /// `true` while any type holds an unflushed request or a running timer.
    pub async fn has_pending_changes(&self) -> bool {
        if !self.shared.is_alive() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::HasPending(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Non-blocking variant of [`has_pending_changes`](Self::has_pending_changes).
    ///
    /// Counts schedules still on their way to the worker as pending.
    pub fn has_pending_changes_now(&self) -> bool {
        self.shared.is_alive() && self.shared.has_pending()
    }

    /// The most recently published status.
    pub fn status(&self) -> SaveStatus {
        *self.shared.status.borrow()
    }

    /// A receiver that observes every published status.
    pub fn watch_status(&self) -> watch::Receiver<SaveStatus> {
        self.shared.status.subscribe()
    }

    /// Wall-clock time of the last successful save.
    pub fn last_save_time(&self) -> Option<DateTime<Utc>> {
        self.shared.last_saved_at()
    }

    pub fn is_destroyed(&self) -> bool {
        !self.shared.is_alive()
    }

    /// Cancel all timers and drop pending requests without flushing.
    ///
    /// Saves already sent to the backend keep running; their results are
    /// delivered to waiting `save_now` callers only, never to callbacks.
    /// Calling this more than once is harmless.
    pub fn destroy(&self) {
        if self.shared.kill() {
            let _ = self.commands.send(Command::Destroy);
        }
    }
}

impl Drop for AutoSaveCoordinator {
    fn drop(&mut self) {
        self.destroy();
    }
}
