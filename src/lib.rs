//! # subtitle_saver
//!
//! Debounced, type-routed auto-saving for a subtitle editor, plus fan-out of
//! backend conversion progress to independent observers.
//!
//! ## Overview
//!
//! An [`AutoSaveCoordinator`] runs a background worker that keeps one pending
//! slot per [`SaveType`]. Repeated [`schedule`](AutoSaveCoordinator::schedule)
//! calls of the same type coalesce (last write wins) and are flushed once no
//! new request arrived for `debounce_time`, or once `max_wait_time` has passed
//! since the first request of the burst. [`save_now`](AutoSaveCoordinator::save_now)
//! skips the wait and returns the backend outcome. Saves of one type never
//! overlap; different types proceed independently.
//!
//! Status transitions (`idle → pending → saving → saved → idle`, or `error`)
//! are reported through callbacks, and every callback runs isolated: a
//! panicking observer is logged and never affects its siblings or the save.
//!
//! [`SubtitleService`] is the facade an editor owns: it validates payloads,
//! routes each type to the matching [`SubtitleBackend`] call, republishes
//! updated projects, and routes [`ProgressEvent`]s from a [`ProgressChannel`]
//! to conversion observers, firing a [`CompletionNotifier`] once per
//! finished job.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use subtitle_saver::{CoordinatorBuilder, Result, SaveHandler, SaveOutcome, SavePayload};
//!
//! struct Backend;
//!
//! impl SaveHandler for Backend {
//!     async fn save(&self, payload: &SavePayload) -> Result<SaveOutcome> {
//!         // call the remote API for payload.save_type() ...
//!         Ok(SaveOutcome::succeeded(None))
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let coordinator = CoordinatorBuilder::new(Backend)
//!     .on_status_change(|status| println!("save status: {status}"))
//!     .build();
//!
//! coordinator.schedule(SavePayload::project_name("Episode 1"));
//! coordinator.schedule(SavePayload::project_name("Episode 1 (final)"));
//!
//! // Or wait for the backend:
//! coordinator.save_now(SavePayload::project_name("Episode 2")).await?;
//!
//! coordinator.destroy();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod handle;
pub mod handler;
pub mod orchestrator;
pub mod outcome;
pub mod progress;
pub mod project;
pub mod registry;
pub mod request;
pub mod service;
pub mod status;
mod worker;

pub use backend::SubtitleBackend;
pub use config::{CoordinatorBuilder, DEFAULT_DEBOUNCE_TIME, DEFAULT_MAX_WAIT_TIME, ServiceOptions};
pub use error::{Result, SaveError};
pub use handle::AutoSaveCoordinator;
pub use handler::SaveHandler;
pub use orchestrator::{BackendRoute, SaveOrchestrator};
pub use outcome::{BackendResponse, SaveOutcome};
pub use progress::{
    CompletionNotifier, ConversionEvent, ConversionState, DEFAULT_TRACKED_SUBJECTS,
    ProgressChannel, ProgressEvent, ProgressFanoutRouter, ProgressHandler, TERMINAL_STATUSES,
    Unsubscribe, is_terminal_status,
};
pub use project::{ExportedFile, Project};
pub use registry::{SubscriberRegistry, Subscription};
pub use request::{SavePayload, SaveRequest, SaveType};
pub use service::SubtitleService;
pub use status::SaveStatus;
