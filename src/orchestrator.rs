//! Validation and routing in front of the coordinator.
//!
//! [`SaveOrchestrator`] checks each payload's field contract before anything
//! reaches the backend, then hands it to the [`AutoSaveCoordinator`].
//! [`BackendRoute`] is the [`SaveHandler`] the coordinator flushes into: it
//! picks the backend call for each [`SavePayload`] variant.

use std::sync::Arc;

use crate::backend::SubtitleBackend;
use crate::config::{CoordinatorBuilder, ServiceOptions};
use crate::error::{Result, SaveError};
use crate::handle::AutoSaveCoordinator;
use crate::handler::SaveHandler;
use crate::outcome::SaveOutcome;
use crate::project::Project;
use crate::request::SavePayload;
use crate::status::SaveStatus;

/// Maps each save type to the matching [`SubtitleBackend`] operation for one project.
pub struct BackendRoute<B> {
    backend: Arc<B>,
    project_id: String,
}

impl<B: SubtitleBackend> BackendRoute<B> {
    pub fn new(backend: Arc<B>, project_id: impl Into<String>) -> Self {
        Self {
            backend,
            project_id: project_id.into(),
        }
    }
}

impl<B: SubtitleBackend> SaveHandler for BackendRoute<B> {
    async fn save(&self, payload: &SavePayload) -> Result<SaveOutcome> {
        let id = self.project_id.as_str();
        let backend = &*self.backend;

        let response = match payload {
            SavePayload::ProjectName { name } => backend.update_project_name(id, name).await?,
            SavePayload::Metadata { metadata } => {
                backend.update_project_metadata(id, metadata).await?
            }
            SavePayload::Segment {
                segment_id,
                segment,
            } => {
                backend
                    .update_subtitle_segment(id, segment_id, segment)
                    .await?
            }
            SavePayload::LanguageContent {
                segment_id,
                language_code,
                content,
            } => {
                backend
                    .update_language_content(id, segment_id, language_code, content)
                    .await?
            }
            SavePayload::LanguageMetadata {
                language_code,
                metadata,
            } => {
                backend
                    .update_language_metadata(id, language_code, metadata)
                    .await?
            }
        };

        SaveOutcome::from(response).into_result()
    }
}

fn log_save_error(err: &SaveError) {
    tracing::error!("Save error: {err}");
}

/// Front door for every save: validates, then schedules or saves immediately.
pub struct SaveOrchestrator {
    coordinator: AutoSaveCoordinator,
}

impl SaveOrchestrator {
    /// Wrap an already built coordinator.
    pub fn new(coordinator: AutoSaveCoordinator) -> Self {
        Self { coordinator }
    }

    /// Build a coordinator that saves `project_id` through `backend`.
    ///
    /// `on_status` sees every status transition; `on_project` receives the
    /// updated project whenever a save returns one.
    pub fn start<B: SubtitleBackend>(
        backend: Arc<B>,
        project_id: impl Into<String>,
        options: ServiceOptions,
        on_status: impl Fn(SaveStatus) + Send + Sync + 'static,
        on_project: impl Fn(Project) + Send + Sync + 'static,
    ) -> Self {
        let coordinator = CoordinatorBuilder::new(BackendRoute::new(backend, project_id))
            .debounce_time(options.debounce_time)
            .max_wait_time(options.max_wait_time)
            .on_status_change(on_status)
            .on_error(log_save_error)
            .on_saved(move |_, outcome| {
                if let Some(project) = outcome.data().and_then(Project::from_save_data) {
                    on_project(project);
                }
            })
            .build();
        Self::new(coordinator)
    }

    /// Validate and save immediately. Failures of any kind are returned.
    pub async fn save(&self, payload: SavePayload) -> Result<SaveOutcome> {
        let payload = payload.validate()?;
        self.coordinator.save_now(payload).await
    }

    /// Validate and schedule a debounced save.
    ///
    /// Nothing is returned: a validation failure goes to the coordinator's
    /// `on_error` hook, like any failed flush.
    pub fn schedule(&self, payload: SavePayload) {
        match payload.validate() {
            Ok(payload) => self.coordinator.schedule(payload),
            Err(e) => self.coordinator.report_error(e),
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.coordinator.status()
    }

    pub async fn has_pending_changes(&self) -> bool {
        self.coordinator.has_pending_changes().await
    }

    pub fn has_pending_changes_now(&self) -> bool {
        self.coordinator.has_pending_changes_now()
    }

    pub fn coordinator(&self) -> &AutoSaveCoordinator {
        &self.coordinator
    }

    pub fn destroy(&self) {
        self.coordinator.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::BackendResponse;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        reply: Mutex<Option<BackendResponse>>,
    }

    impl Recorder {
        fn record(&self, call: String) -> Result<BackendResponse> {
            self.calls.lock().unwrap().push(call);
            Ok(self
                .reply
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| BackendResponse::ok(None)))
        }
    }

    impl SubtitleBackend for Recorder {
        async fn update_project_name(&self, p: &str, name: &str) -> Result<BackendResponse> {
            self.record(format!("name:{p}:{name}"))
        }
        async fn update_project_metadata(&self, p: &str, m: &Value) -> Result<BackendResponse> {
            self.record(format!("metadata:{p}:{m}"))
        }
        async fn update_subtitle_segment(
            &self,
            p: &str,
            s: &str,
            _: &Value,
        ) -> Result<BackendResponse> {
            self.record(format!("segment:{p}:{s}"))
        }
        async fn update_language_content(
            &self,
            p: &str,
            s: &str,
            l: &str,
            _: &Value,
        ) -> Result<BackendResponse> {
            self.record(format!("content:{p}:{s}:{l}"))
        }
        async fn update_language_metadata(
            &self,
            p: &str,
            l: &str,
            _: &Value,
        ) -> Result<BackendResponse> {
            self.record(format!("lang_meta:{p}:{l}"))
        }
        async fn supported_converters(&self) -> Result<BackendResponse> {
            self.record("converters".into())
        }
        async fn zh_convert_subtitle(&self, _: &str, _: &str, _: &str) -> Result<BackendResponse> {
            self.record("convert".into())
        }
        async fn export_subtitle_to_file(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<BackendResponse> {
            self.record("export".into())
        }
    }

    #[tokio::test]
    async fn route_calls_matching_backend_operation() {
        let backend = Arc::new(Recorder::default());
        let route = BackendRoute::new(backend.clone(), "p1");

        route.save(&SavePayload::project_name("Foo")).await.unwrap();
        route
            .save(&SavePayload::segment("s1", json!({"text": "a"})))
            .await
            .unwrap();
        route
            .save(&SavePayload::language_content("s1", "en", json!("hi")))
            .await
            .unwrap();
        route
            .save(&SavePayload::language_metadata("zh", json!({})))
            .await
            .unwrap();

        assert_eq!(
            *backend.calls.lock().unwrap(),
            [
                "name:p1:Foo",
                "segment:p1:s1",
                "content:p1:s1:en",
                "lang_meta:p1:zh"
            ]
        );
    }

    #[tokio::test]
    async fn route_turns_rejection_into_error() {
        let backend = Arc::new(Recorder::default());
        *backend.reply.lock().unwrap() = Some(BackendResponse::failed("conflict"));
        let route = BackendRoute::new(backend, "p1");

        let err = route
            .save(&SavePayload::metadata(json!({"fps": 25})))
            .await
            .unwrap_err();
        assert_eq!(err, SaveError::Rejected("conflict".into()));
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_backend() {
        let backend = Arc::new(Recorder::default());
        let orchestrator = SaveOrchestrator::start(
            backend.clone(),
            "p1",
            ServiceOptions::default(),
            |_| {},
            |_| {},
        );

        let err = orchestrator
            .save(SavePayload::segment("s1", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, SaveError::Validation(_)));

        orchestrator.schedule(SavePayload::project_name("  "));
        assert!(!orchestrator.has_pending_changes().await);
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_deferred_save_reaches_error_hook() {
        let backend = Arc::new(Recorder::default());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        let orchestrator = SaveOrchestrator::new(
            CoordinatorBuilder::new(BackendRoute::new(backend.clone(), "p1"))
                .on_error(move |err| e.lock().unwrap().push(err.clone()))
                .build(),
        );

        orchestrator.schedule(SavePayload::segment("", Value::Null));
        // ordered channel: the report is handled before this query
        assert!(!orchestrator.has_pending_changes().await);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SaveError::Validation(_)));
        assert_eq!(orchestrator.status(), SaveStatus::Idle);
        assert!(backend.calls.lock().unwrap().is_empty());
    }
}
