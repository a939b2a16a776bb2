//! Progress events from long-running backend jobs and their fan-out.
//!
//! The backend pushes `{status, ...}` events over an external channel. The
//! [`ProgressFanoutRouter`] subscribes to that channel once per subject,
//! wraps each event into a [`ConversionEvent::Progress`], fires the one-shot
//! [`CompletionNotifier`] for terminal statuses, and forwards everything to a
//! [`SubscriberRegistry`].
//!
//! ```text
//! ProgressChannel ──► router.handle_event(ev)
//!                        ├─► terminal & first for subject? ──► notifier (once)
//!                        └─► registry.notify(ConversionEvent::Progress)
//!                               ├─► subscriber 1
//!                               └─► subscriber N
//! ```

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registry::{SubscriberRegistry, panic_message};

/// Statuses after which no further progress is expected for a subject.
pub const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "cancelled"];

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// One raw event from the push channel.
///
/// `status` comes from an open-ended set; only membership in
/// [`TERMINAL_STATUSES`] is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ProgressEvent {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            id: None,
            status: status.into(),
            payload: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal_status(&self.status)
    }
}

/// What conversion observers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversionEvent {
    #[serde(rename = "conversion_started")]
    Started {
        origin: String,
        converter: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "conversion_progress")]
    Progress {
        data: ProgressEvent,
        is_terminal: bool,
        timestamp: DateTime<Utc>,
    },
}

impl ConversionEvent {
    pub fn started(origin: impl Into<String>, converter: impl Into<String>) -> Self {
        Self::Started {
            origin: origin.into(),
            converter: converter.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn progress(data: ProgressEvent) -> Self {
        Self::Progress {
            is_terminal: data.is_terminal(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Progress {
                is_terminal: true,
                ..
            }
        )
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Started { timestamp, .. } | Self::Progress { timestamp, .. } => *timestamp,
        }
    }
}

/// Callback the push channel invokes for each event.
pub type ProgressHandler = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Removes a handler from the push channel when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// The external push channel carrying progress events.
pub trait ProgressChannel: Send + Sync + 'static {
    fn subscribe(&self, handler: ProgressHandler) -> Unsubscribe;
}

/// User-facing "conversion finished" side effect.
pub trait CompletionNotifier: Send + Sync + 'static {
    fn conversion_finished(&self, event: &ProgressEvent);
}

impl<F> CompletionNotifier for F
where
    F: Fn(&ProgressEvent) + Send + Sync + 'static,
{
    fn conversion_finished(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Subjects tracked before finished ones are forgotten.
pub const DEFAULT_TRACKED_SUBJECTS: usize = 256;

/// Last dispatched status per subject.
///
/// Finished subjects are kept so a repeated terminal event is not
/// re-notified, but only until the map reaches its limit; then every
/// subject whose last status is terminal is pruned. Running subjects are
/// never dropped.
#[derive(Debug)]
pub struct ConversionState {
    last: HashMap<String, String>,
    limit: usize,
}

impl Default for ConversionState {
    fn default() -> Self {
        Self::with_limit(DEFAULT_TRACKED_SUBJECTS)
    }
}

impl ConversionState {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            last: HashMap::new(),
            limit,
        }
    }

    /// Record `status` for `subject`; returns `true` if a terminal
    /// notification is due (terminal now, not terminal last time).
    pub fn record(&mut self, subject: &str, status: &str) -> bool {
        if self.last.len() >= self.limit && !self.last.contains_key(subject) {
            self.last.retain(|_, s| !is_terminal_status(s));
        }
        let previous = self.last.insert(subject.to_string(), status.to_string());
        is_terminal_status(status) && !previous.is_some_and(|p| is_terminal_status(&p))
    }

    pub fn last_status(&self, subject: &str) -> Option<&str> {
        self.last.get(subject).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

struct RouterInner {
    registry: SubscriberRegistry<ConversionEvent>,
    notifier: Arc<dyn CompletionNotifier>,
    subject: Mutex<String>,
    state: Mutex<ConversionState>,
    active: AtomicBool,
}

impl RouterInner {
    fn handle(&self, event: ProgressEvent) {
        if !self.active.load(Ordering::Acquire) {
            tracing::trace!(status = %event.status, "Dropping progress event after teardown");
            return;
        }

        let subject = match &event.id {
            Some(id) => id.clone(),
            None => self
                .subject
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        let notify = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&subject, &event.status);

        if notify {
            tracing::info!(%subject, status = %event.status, "Conversion finished");
            if let Err(panic) =
                catch_unwind(AssertUnwindSafe(|| self.notifier.conversion_finished(&event)))
            {
                tracing::error!("Completion notifier panicked: {}", panic_message(panic.as_ref()));
            }
        }

        self.registry.notify(&ConversionEvent::progress(event));
    }
}

/// Routes push-channel progress events to conversion subscribers.
pub struct ProgressFanoutRouter {
    inner: Arc<RouterInner>,
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl ProgressFanoutRouter {
    pub fn new(
        registry: SubscriberRegistry<ConversionEvent>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry,
                notifier,
                subject: Mutex::new(String::new()),
                state: Mutex::new(ConversionState::default()),
                active: AtomicBool::new(false),
            }),
            unsubscribe: Mutex::new(None),
        }
    }

    /// Subscribe to `channel` for `subject`.
    ///
    /// Returns `false` without subscribing again if already initialised.
    pub fn initialize<C: ProgressChannel + ?Sized>(
        &self,
        channel: &C,
        subject: impl Into<String>,
    ) -> bool {
        let mut unsubscribe = self
            .unsubscribe
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if unsubscribe.is_some() {
            tracing::debug!("Progress router already subscribed");
            return false;
        }

        *self
            .inner
            .subject
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = subject.into();
        self.inner.active.store(true, Ordering::Release);

        let inner = Arc::clone(&self.inner);
        *unsubscribe = Some(channel.subscribe(Arc::new(move |event| inner.handle(event))));
        true
    }

    /// Unsubscribe from the channel and forget per-subject state.
    ///
    /// Returns `false` if there was nothing to tear down.
    pub fn teardown(&self) -> bool {
        let Some(unsubscribe) = self
            .unsubscribe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        self.inner.active.store(false, Ordering::Release);
        unsubscribe();
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        true
    }

    /// Feed one event through the router, as the push channel would.
    pub fn handle_event(&self, event: ProgressEvent) {
        self.inner.handle(event);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn last_status(&self, subject: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_status(subject)
            .map(str::to_string)
    }
}

impl Drop for ProgressFanoutRouter {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct TestChannel {
        handlers: Mutex<Vec<ProgressHandler>>,
        unsubscribed: Arc<AtomicUsize>,
    }

    impl TestChannel {
        fn push(&self, event: ProgressEvent) {
            let handlers = self.handlers.lock().unwrap().clone();
            for h in handlers {
                h(event.clone());
            }
        }
    }

    impl ProgressChannel for TestChannel {
        fn subscribe(&self, handler: ProgressHandler) -> Unsubscribe {
            self.handlers.lock().unwrap().push(handler);
            let count = self.unsubscribed.clone();
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn router_with_counter() -> (
        ProgressFanoutRouter,
        SubscriberRegistry<ConversionEvent>,
        Arc<AtomicUsize>,
    ) {
        let registry = SubscriberRegistry::new("conversion");
        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        let router = ProgressFanoutRouter::new(
            registry.clone(),
            Arc::new(move |_: &ProgressEvent| {
                n.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (router, registry, notified)
    }

    #[test]
    fn terminal_set() {
        assert!(is_terminal_status("completed"));
        assert!(is_terminal_status("failed"));
        assert!(is_terminal_status("cancelled"));
        assert!(!is_terminal_status("processing"));
        assert!(!is_terminal_status("Completed"));
    }

    #[test]
    fn finished_subjects_are_pruned_at_limit() {
        let mut state = ConversionState::with_limit(3);
        assert!(!state.record("running", "processing"));
        assert!(state.record("a", "completed"));
        assert!(state.record("b", "failed"));
        assert_eq!(state.len(), 3);

        // a new subject at the limit drops a and b, keeps the running one
        assert!(!state.record("c", "processing"));
        assert_eq!(state.len(), 2);
        assert_eq!(state.last_status("running"), Some("processing"));
        assert!(state.last_status("a").is_none());

        // updating a known subject never prunes
        assert!(state.record("c", "completed"));
        assert!(!state.record("c", "completed"));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn processing_then_completed_notifies_once() {
        let (router, registry, notified) = router_with_counter();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        registry.on(move |ev: &ConversionEvent| s.lock().unwrap().push(ev.is_terminal()));

        router.handle_event(ProgressEvent::new("processing").with_id("task-1"));
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        router.handle_event(ProgressEvent::new("completed").with_id("task-1"));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), [false, true]);
    }

    #[test]
    fn notifier_runs_once_regardless_of_subscriber_count() {
        let (router, registry, notified) = router_with_counter();
        let delivered = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let d = delivered.clone();
            registry.on(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            });
        }

        router.handle_event(ProgressEvent::new("failed"));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn repeated_terminal_status_is_not_renotified() {
        let (router, registry, notified) = router_with_counter();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        registry.on(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        router.handle_event(ProgressEvent::new("completed").with_id("a"));
        router.handle_event(ProgressEvent::new("completed").with_id("a"));
        router.handle_event(ProgressEvent::new("completed").with_id("b"));
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert_eq!(delivered.load(Ordering::SeqCst), 3);

        // a new run for "a"
        router.handle_event(ProgressEvent::new("processing").with_id("a"));
        router.handle_event(ProgressEvent::new("cancelled").with_id("a"));
        assert_eq!(notified.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn initialize_is_idempotent_and_teardown_unsubscribes_once() {
        let (router, registry, _) = router_with_counter();
        let channel = TestChannel::default();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        registry.on(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        assert!(router.initialize(&channel, "project-1"));
        assert!(!router.initialize(&channel, "project-1"));
        assert_eq!(channel.handlers.lock().unwrap().len(), 1);

        channel.push(ProgressEvent::new("processing"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(router.last_status("project-1").as_deref(), Some("processing"));

        assert!(router.teardown());
        assert!(!router.teardown());
        assert_eq!(channel.unsubscribed.load(Ordering::SeqCst), 1);

        // the test channel never forgets handlers; the router must ignore them
        channel.push(ProgressEvent::new("completed"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(router.last_status("project-1").is_none());
    }

    #[test]
    fn panicking_notifier_still_delivers_to_subscribers() {
        let registry = SubscriberRegistry::new("conversion");
        fn failing_toast(_: &ProgressEvent) {
            panic!("toast failed");
        }
        let router = ProgressFanoutRouter::new(registry.clone(), Arc::new(failing_toast));
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        registry.on(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        router.handle_event(ProgressEvent::new("completed"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn progress_event_serialization() {
        let raw = r#"{"id":"t1","status":"processing","progress":42.5}"#;
        let event: ProgressEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.payload["progress"], 42.5);

        let wrapped = serde_json::to_value(ConversionEvent::progress(event)).unwrap();
        assert_eq!(wrapped["type"], "conversion_progress");
        assert_eq!(wrapped["is_terminal"], false);
        assert_eq!(wrapped["data"]["status"], "processing");
    }
}
