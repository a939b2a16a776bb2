//! The subtitle backend the service talks to.
//!
//! Every operation resolves to a [`BackendResponse`]; `Err` is reserved for
//! transport failures ([`SaveError::Transport`](crate::SaveError::Transport)).
//! A `success: false` answer is a regular `Ok` response and is interpreted
//! by the caller.

use std::future::Future;

use serde_json::Value;

use crate::error::Result;
use crate::outcome::BackendResponse;

/// Remote API for subtitle projects.
///
/// Implementations must be `Send + Sync + 'static` so one instance can be
/// shared between the service and the save worker's tasks.
///
/// # Implementing a custom backend
///
/// ```rust,no_run
/// use serde_json::Value;
/// use subtitle_saver::{BackendResponse, Result, SubtitleBackend};
///
/// struct Offline;
///
/// impl SubtitleBackend for Offline {
///     async fn update_project_name(&self, _: &str, _: &str) -> Result<BackendResponse> {
///         Ok(BackendResponse::ok(None))
///     }
///     async fn update_project_metadata(&self, _: &str, _: &Value) -> Result<BackendResponse> {
///         Ok(BackendResponse::ok(None))
///     }
///     async fn update_subtitle_segment(&self, _: &str, _: &str, _: &Value) -> Result<BackendResponse> {
///         Ok(BackendResponse::ok(None))
///     }
///     async fn update_language_content(
///         &self, _: &str, _: &str, _: &str, _: &Value,
///     ) -> Result<BackendResponse> {
///         Ok(BackendResponse::ok(None))
///     }
///     async fn update_language_metadata(&self, _: &str, _: &str, _: &Value) -> Result<BackendResponse> {
///         Ok(BackendResponse::ok(None))
///     }
///     async fn supported_converters(&self) -> Result<BackendResponse> {
///         Ok(BackendResponse::ok(Some(r#"["s2t","t2s"]"#.into())))
///     }
///     async fn zh_convert_subtitle(&self, _: &str, _: &str, _: &str) -> Result<BackendResponse> {
///         Ok(BackendResponse::ok(None))
///     }
///     async fn export_subtitle_to_file(&self, _: &str, _: &str, _: &str) -> Result<BackendResponse> {
///         Ok(BackendResponse::failed("export disabled"))
///     }
/// }
/// ```
pub trait SubtitleBackend: Send + Sync + 'static {
    fn update_project_name(
        &self,
        project_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<BackendResponse>> + Send;

    fn update_project_metadata(
        &self,
        project_id: &str,
        metadata: &Value,
    ) -> impl Future<Output = Result<BackendResponse>> + Send;

    fn update_subtitle_segment(
        &self,
        project_id: &str,
        segment_id: &str,
        segment: &Value,
    ) -> impl Future<Output = Result<BackendResponse>> + Send;

    fn update_language_content(
        &self,
        project_id: &str,
        segment_id: &str,
        language_code: &str,
        content: &Value,
    ) -> impl Future<Output = Result<BackendResponse>> + Send;

    fn update_language_metadata(
        &self,
        project_id: &str,
        language_code: &str,
        metadata: &Value,
    ) -> impl Future<Output = Result<BackendResponse>> + Send;

    /// `data` holds a JSON array of converter names.
    fn supported_converters(&self) -> impl Future<Output = Result<BackendResponse>> + Send;

    /// Start a Chinese script conversion of the `origin` language track.
    fn zh_convert_subtitle(
        &self,
        project_id: &str,
        origin: &str,
        converter: &str,
    ) -> impl Future<Output = Result<BackendResponse>> + Send;

    /// `data` holds a JSON object with `filePath` and `fileName`.
    fn export_subtitle_to_file(
        &self,
        project_id: &str,
        language_code: &str,
        format: &str,
    ) -> impl Future<Output = Result<BackendResponse>> + Send;
}
