//! The [`SaveHandler`] trait: the outbound call the coordinator flushes into.

use std::future::Future;

use crate::error::Result;
use crate::outcome::SaveOutcome;
use crate::request::SavePayload;

/// Performs one save against the backend.
///
/// The coordinator calls this once per flush, never concurrently for the same
/// [`SaveType`](crate::SaveType). Implementations must be `Send + Sync + 'static`
/// because each call runs on its own spawned task.
///
/// Returning `Ok` with a failed [`SaveOutcome`] is treated the same as
/// returning [`SaveError::Rejected`](crate::SaveError::Rejected).
///
/// # Implementing a custom handler
///
/// ```rust,no_run
/// use subtitle_saver::{Result, SaveHandler, SaveOutcome, SavePayload};
///
/// struct LogOnly;
///
/// impl SaveHandler for LogOnly {
///     async fn save(&self, payload: &SavePayload) -> Result<SaveOutcome> {
///         println!("would save {}", payload.save_type());
///         Ok(SaveOutcome::succeeded(None))
///     }
/// }
/// ```
pub trait SaveHandler: Send + Sync + 'static {
    fn save(&self, payload: &SavePayload) -> impl Future<Output = Result<SaveOutcome>> + Send;
}
