//! The subtitle editing service: one explicitly owned value per editor.
//!
//! [`SubtitleService`] ties the pieces together for the project currently
//! open: a [`SaveOrchestrator`] for saves, a [`ProgressFanoutRouter`] for
//! conversion progress, and three [`SubscriberRegistry`] channels (status,
//! project updates, conversion events).
//!
//! Lifecycle is explicit: [`initialize`](SubtitleService::initialize) opens a
//! project, [`destroy`](SubtitleService::destroy) releases everything, and
//! [`reinitialize`](SubtitleService::reinitialize) does both.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backend::SubtitleBackend;
use crate::config::ServiceOptions;
use crate::error::{Result, SaveError};
use crate::orchestrator::SaveOrchestrator;
use crate::outcome::{BackendResponse, SaveOutcome};
use crate::progress::{
    CompletionNotifier, ConversionEvent, ProgressChannel, ProgressEvent, ProgressFanoutRouter,
};
use crate::project::{ExportedFile, Project};
use crate::registry::{SubscriberRegistry, Subscription};
use crate::request::SavePayload;
use crate::status::SaveStatus;

type CurrentProject = Arc<Mutex<Option<Project>>>;

fn publish_project(
    current: &Mutex<Option<Project>>,
    callbacks: &SubscriberRegistry<Project>,
    project: Project,
) {
    *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(project.clone());
    callbacks.notify(&project);
}

/// Save, observe and convert subtitles of one open project.
///
/// # Example
///
/// ```rust,ignore
/// let mut service = SubtitleService::new(backend, channel, notifier, ServiceOptions::default());
/// service.initialize(project).await;
///
/// let _sub = service.on_status_change(|status| println!("{status}"));
/// service.save_subtitle_segment_async("s1", segment_json);
///
/// service.destroy();
/// ```
pub struct SubtitleService<B, C> {
    backend: Arc<B>,
    channel: Arc<C>,
    options: ServiceOptions,
    saver: Option<SaveOrchestrator>,
    router: ProgressFanoutRouter,
    current_project: CurrentProject,
    status_callbacks: SubscriberRegistry<SaveStatus>,
    project_callbacks: SubscriberRegistry<Project>,
    conversion_callbacks: SubscriberRegistry<ConversionEvent>,
    supported_converters: Vec<String>,
}

impl<B: SubtitleBackend, C: ProgressChannel> SubtitleService<B, C> {
    pub fn new(
        backend: Arc<B>,
        channel: Arc<C>,
        notifier: Arc<dyn CompletionNotifier>,
        options: ServiceOptions,
    ) -> Self {
        let conversion_callbacks = SubscriberRegistry::new("conversion");
        Self {
            backend,
            channel,
            options,
            saver: None,
            router: ProgressFanoutRouter::new(conversion_callbacks.clone(), notifier),
            current_project: Arc::new(Mutex::new(None)),
            status_callbacks: SubscriberRegistry::new("status"),
            project_callbacks: SubscriberRegistry::new("project_update"),
            conversion_callbacks,
            supported_converters: Vec::new(),
        }
    }

    /// Open `project`: start auto-saving, load converters, subscribe to progress.
    ///
    /// On a service that is already initialised the previous saver and
    /// progress subscription are released first; registered observers are
    /// kept. Use [`reinitialize`](Self::reinitialize) to drop them too.
    /// Must be called from within a tokio runtime.
    pub async fn initialize(&mut self, project: Project) {
        if self.saver.is_some() || self.router.is_active() {
            tracing::debug!("Service already initialized, releasing previous project");
            self.release();
        }

        let project_id = project.id.clone();
        *self.lock_project() = Some(project);

        let status_callbacks = self.status_callbacks.clone();
        let project_callbacks = self.project_callbacks.clone();
        let current = Arc::clone(&self.current_project);
        self.saver = Some(SaveOrchestrator::start(
            Arc::clone(&self.backend),
            project_id.clone(),
            self.options,
            move |status| status_callbacks.notify(&status),
            move |project| publish_project(&current, &project_callbacks, project),
        ));

        if let Err(e) = self.load_supported_converters().await {
            tracing::error!("Failed to initialize ZH convert: {e}");
        }

        self.router.initialize(&*self.channel, project_id);
        tracing::info!("Subtitle service initialized");
    }

    /// Release everything. Pending saves are dropped, not flushed.
    ///
    /// Safe to call any number of times.
    pub fn destroy(&mut self) {
        self.release();
        self.status_callbacks.clear();
        self.project_callbacks.clear();
        self.conversion_callbacks.clear();
    }

    /// Stop the saver and the progress subscription, forget the project.
    fn release(&mut self) {
        if let Some(saver) = self.saver.take() {
            saver.destroy();
        }
        self.router.teardown();
        *self.lock_project() = None;
        self.supported_converters.clear();
    }

    pub async fn reinitialize(&mut self, project: Project) {
        self.destroy();
        self.initialize(project).await;
    }

    fn lock_project(&self) -> MutexGuard<'_, Option<Project>> {
        self.current_project
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn saver(&self) -> Result<&SaveOrchestrator> {
        self.saver.as_ref().ok_or(SaveError::NoProject)
    }

    fn current_project_id(&self) -> Result<String> {
        self.lock_project()
            .as_ref()
            .map(|p| p.id.clone())
            .ok_or(SaveError::NoProject)
    }

    // --- immediate saves ---

    pub async fn save_project_name(&self, name: &str) -> Result<SaveOutcome> {
        self.save_now(SavePayload::project_name(name)).await
    }

    pub async fn save_project_metadata(&self, metadata: Value) -> Result<SaveOutcome> {
        self.save_now(SavePayload::metadata(metadata)).await
    }

    pub async fn save_subtitle_segment(
        &self,
        segment_id: &str,
        segment: Value,
    ) -> Result<SaveOutcome> {
        self.save_now(SavePayload::segment(segment_id, segment)).await
    }

    pub async fn save_language_content(
        &self,
        segment_id: &str,
        language_code: &str,
        content: Value,
    ) -> Result<SaveOutcome> {
        self.save_now(SavePayload::language_content(
            segment_id,
            language_code,
            content,
        ))
        .await
    }

    pub async fn save_language_metadata(
        &self,
        language_code: &str,
        metadata: Value,
    ) -> Result<SaveOutcome> {
        self.save_now(SavePayload::language_metadata(language_code, metadata))
            .await
    }

    /// Validate and save `payload` immediately, returning the backend outcome.
    pub async fn save_now(&self, payload: SavePayload) -> Result<SaveOutcome> {
        self.saver()?.save(payload).await
    }

    // --- deferred saves ---

    pub fn save_project_name_async(&self, name: &str) {
        self.schedule(SavePayload::project_name(name));
    }

    pub fn save_project_metadata_async(&self, metadata: Value) {
        self.schedule(SavePayload::metadata(metadata));
    }

    pub fn save_subtitle_segment_async(&self, segment_id: &str, segment: Value) {
        self.schedule(SavePayload::segment(segment_id, segment));
    }

    pub fn save_language_content_async(
        &self,
        segment_id: &str,
        language_code: &str,
        content: Value,
    ) {
        self.schedule(SavePayload::language_content(
            segment_id,
            language_code,
            content,
        ));
    }

    pub fn save_language_metadata_async(&self, language_code: &str, metadata: Value) {
        self.schedule(SavePayload::language_metadata(language_code, metadata));
    }

    /// Queue `payload` for a debounced save. Invalid payloads are logged and dropped.
    pub fn schedule(&self, payload: SavePayload) {
        match self.saver() {
            Ok(saver) => saver.schedule(payload),
            Err(_) => tracing::warn!(
                save_type = %payload.save_type(),
                "No project loaded, dropping deferred save"
            ),
        }
    }

    // --- observation ---

    pub fn on_status_change(
        &self,
        callback: impl Fn(&SaveStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.status_callbacks.on(callback)
    }

    pub fn on_project_update(
        &self,
        callback: impl Fn(&Project) + Send + Sync + 'static,
    ) -> Subscription {
        self.project_callbacks.on(callback)
    }

    pub fn on_conversion_event(
        &self,
        callback: impl Fn(&ConversionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.conversion_callbacks.on(callback)
    }

    pub fn save_status(&self) -> SaveStatus {
        self.saver
            .as_ref()
            .map_or(SaveStatus::Idle, SaveOrchestrator::status)
    }

    pub async fn has_pending_changes(&self) -> bool {
        match &self.saver {
            Some(saver) => saver.has_pending_changes().await,
            None => false,
        }
    }

    /// Snapshot of [`has_pending_changes`](Self::has_pending_changes) that does not wait.
    pub fn has_pending_changes_now(&self) -> bool {
        self.saver
            .as_ref()
            .is_some_and(SaveOrchestrator::has_pending_changes_now)
    }

    pub fn last_save_time(&self) -> Option<DateTime<Utc>> {
        self.saver
            .as_ref()
            .and_then(|s| s.coordinator().last_save_time())
    }

    pub fn current_project(&self) -> Option<Project> {
        self.lock_project().clone()
    }

    /// Replace the current project and notify project observers.
    pub fn update_current_project(&self, project: Project) {
        publish_project(&self.current_project, &self.project_callbacks, project);
    }

    /// Feed a progress event as if it came from the push channel.
    pub fn handle_subtitle_progress(&self, event: ProgressEvent) {
        self.router.handle_event(event);
    }

    // --- Chinese script conversion ---

    /// Fetch and cache the converters the backend supports.
    pub async fn load_supported_converters(&mut self) -> Result<Vec<String>> {
        let response = self
            .backend
            .supported_converters()
            .await?
            .into_result("Failed to get supported converters")?;

        let converters: Vec<String> =
            serde_json::from_str(response.data.as_deref().unwrap_or("[]"))
                .map_err(|e| SaveError::MalformedResponse(e.to_string()))?;
        self.supported_converters = converters.clone();
        Ok(converters)
    }

    pub fn supported_converters(&self) -> &[String] {
        &self.supported_converters
    }

    /// Start converting the `origin` track with `converter`.
    ///
    /// On success a [`ConversionEvent::Started`] goes to conversion observers;
    /// progress then arrives through the push channel.
    pub async fn convert_subtitle(&self, origin: &str, converter: &str) -> Result<BackendResponse> {
        let project_id = self.current_project_id()?;
        if origin.is_empty() || converter.is_empty() {
            return Err(SaveError::validation("Origin and converter are required"));
        }
        if !self.supported_converters.iter().any(|c| c == converter) {
            return Err(SaveError::UnsupportedConverter(converter.to_string()));
        }

        let response = self
            .backend
            .zh_convert_subtitle(&project_id, origin, converter)
            .await
            .and_then(|r| r.into_result("Conversion failed"))
            .inspect_err(|e| tracing::error!("Conversion error: {e}"))?;

        self.conversion_callbacks
            .notify(&ConversionEvent::started(origin, converter));
        Ok(response)
    }

    // --- export ---

    pub async fn export_subtitles(
        &self,
        project_id: &str,
        language_code: &str,
        format: &str,
    ) -> Result<ExportedFile> {
        if project_id.is_empty() || language_code.is_empty() || format.is_empty() {
            return Err(SaveError::validation(
                "Project ID, language code and format are required",
            ));
        }

        let response = self
            .backend
            .export_subtitle_to_file(project_id, language_code, format)
            .await
            .and_then(|r| r.into_result("Export failed"))
            .inspect_err(|e| tracing::error!("Export error: {e}"))?;

        Ok(response
            .data
            .as_deref()
            .and_then(|data| match serde_json::from_str(data) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!("Failed to parse export result: {e}");
                    None
                }
            })
            .unwrap_or_default())
    }
}
