//! Save requests: the closed set of save types and their typed payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{Result, SaveError};

/// Tag identifying which backend operation a payload maps to.
///
/// Each type owns one pending slot in the coordinator, so requests of the
/// same type coalesce while different types never block each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
    ProjectName,
    Metadata,
    Segment,
    LanguageContent,
    LanguageMetadata,
}

impl SaveType {
    /// All save types, in declaration order.
    pub const ALL: [SaveType; 5] = [
        Self::ProjectName,
        Self::Metadata,
        Self::Segment,
        Self::LanguageContent,
        Self::LanguageMetadata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectName => "project_name",
            Self::Metadata => "metadata",
            Self::Segment => "segment",
            Self::LanguageContent => "language_content",
            Self::LanguageMetadata => "language_metadata",
        }
    }
}

impl std::fmt::Display for SaveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The data carried by a save, one variant per [`SaveType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SavePayload {
    ProjectName {
        name: String,
    },
    Metadata {
        metadata: Value,
    },
    Segment {
        segment_id: String,
        segment: Value,
    },
    LanguageContent {
        segment_id: String,
        language_code: String,
        content: Value,
    },
    LanguageMetadata {
        language_code: String,
        metadata: Value,
    },
}

impl SavePayload {
    pub fn project_name(name: impl Into<String>) -> Self {
        Self::ProjectName { name: name.into() }
    }

    pub fn metadata(metadata: Value) -> Self {
        Self::Metadata { metadata }
    }

    pub fn segment(segment_id: impl Into<String>, segment: Value) -> Self {
        Self::Segment {
            segment_id: segment_id.into(),
            segment,
        }
    }

    pub fn language_content(
        segment_id: impl Into<String>,
        language_code: impl Into<String>,
        content: Value,
    ) -> Self {
        Self::LanguageContent {
            segment_id: segment_id.into(),
            language_code: language_code.into(),
            content,
        }
    }

    pub fn language_metadata(language_code: impl Into<String>, metadata: Value) -> Self {
        Self::LanguageMetadata {
            language_code: language_code.into(),
            metadata,
        }
    }

    /// The slot this payload is coalesced into.
    pub fn save_type(&self) -> SaveType {
        match self {
            Self::ProjectName { .. } => SaveType::ProjectName,
            Self::Metadata { .. } => SaveType::Metadata,
            Self::Segment { .. } => SaveType::Segment,
            Self::LanguageContent { .. } => SaveType::LanguageContent,
            Self::LanguageMetadata { .. } => SaveType::LanguageMetadata,
        }
    }

    /// Check the per-type required-field contract.
    ///
    /// Project names are trimmed in place; everything else is left untouched.
    pub fn validate(mut self) -> Result<Self> {
        match &mut self {
            Self::ProjectName { name } => {
                let trimmed = name.trim().to_string();
                if trimmed.is_empty() {
                    return Err(SaveError::validation("Project name is required"));
                }
                *name = trimmed;
            }
            Self::Metadata { metadata } => {
                if !metadata.is_object() {
                    return Err(SaveError::validation(
                        "Metadata is required and must be an object",
                    ));
                }
            }
            Self::Segment {
                segment_id,
                segment,
            } => {
                if segment_id.is_empty() || segment.is_null() {
                    return Err(SaveError::validation(
                        "Segment ID and segment data are required",
                    ));
                }
            }
            Self::LanguageContent {
                segment_id,
                language_code,
                content,
            } => {
                if segment_id.is_empty() || language_code.is_empty() || content.is_null() {
                    return Err(SaveError::validation(
                        "Segment ID, language code and content are required",
                    ));
                }
            }
            Self::LanguageMetadata {
                language_code,
                metadata,
            } => {
                if language_code.is_empty() || metadata.is_null() {
                    return Err(SaveError::validation(
                        "Language code and metadata are required",
                    ));
                }
            }
        }
        Ok(self)
    }
}

/// A payload waiting in (or promoted out of) a coordinator slot.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub payload: SavePayload,
    pub enqueued_at: Instant,
}

impl SaveRequest {
    pub fn new(payload: SavePayload) -> Self {
        Self {
            payload,
            enqueued_at: Instant::now(),
        }
    }

    pub fn save_type(&self) -> SaveType {
        self.payload.save_type()
    }
}
