//! Project snapshots and export results decoded from backend data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A subtitle project as returned by the backend.
///
/// Only `id` is interpreted; every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Project {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Decode the updated-entity JSON a successful save may carry.
    ///
    /// The save already succeeded server-side, so a bad payload is only logged.
    pub fn from_save_data(data: &str) -> Option<Self> {
        match serde_json::from_str(data) {
            Ok(project) => Some(project),
            Err(e) => {
                tracing::warn!("Failed to parse updated project data: {e}");
                None
            }
        }
    }
}

/// Where an export landed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn project_keeps_unknown_fields() {
        let p = Project::from_save_data(r#"{"id":"p1","project_name":"Foobar","languages":{}}"#)
            .unwrap();
        assert_eq!(p.id, "p1");
        assert_eq!(p.get("project_name"), Some(&json!("Foobar")));
        assert!(p.get("languages").is_some());
    }

    #[test]
    fn bad_project_data_is_swallowed() {
        assert!(Project::from_save_data("not json").is_none());
        assert!(Project::from_save_data(r#"{"name":"no id"}"#).is_none());
    }

    #[test]
    fn exported_file_uses_camel_case() {
        let f: ExportedFile =
            serde_json::from_str(r#"{"filePath":"/tmp/a.srt","fileName":"a.srt"}"#).unwrap();
        assert_eq!(f.file_path.as_deref(), Some("/tmp/a.srt"));
        assert_eq!(f.file_name.as_deref(), Some("a.srt"));
    }
}
