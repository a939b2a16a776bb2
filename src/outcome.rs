//! Results of backend calls.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SaveError};

const DEFAULT_FAILURE: &str = "Save operation failed";

/// The raw response shape every backend operation returns.
///
/// `data` is an opaque JSON string; callers parse it and swallow failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl BackendResponse {
    pub fn ok(data: Option<String>) -> Self {
        Self {
            success: true,
            data,
            msg: None,
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            msg: Some(msg.into()),
        }
    }

    /// Turn a `success: false` response into [`SaveError::Rejected`],
    /// falling back to `default_msg` when the backend sent no message.
    pub fn into_result(self, default_msg: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            let msg = self
                .msg
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| default_msg.to_string());
            Err(SaveError::Rejected(msg))
        }
    }
}

/// Outcome of one save.
///
/// `success == false` always carries an `error_message`; a successful outcome
/// may carry the updated entity as a JSON string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    success: bool,
    data: Option<String>,
    error_message: Option<String>,
}

impl SaveOutcome {
    pub fn succeeded(data: Option<String>) -> Self {
        Self {
            success: true,
            data,
            error_message: None,
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(msg.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Failed outcomes become [`SaveError::Rejected`].
    pub fn into_result(self) -> Result<Self> {
        match self.error_message {
            Some(msg) if !self.success => Err(SaveError::Rejected(msg)),
            _ => Ok(self),
        }
    }
}

impl From<BackendResponse> for SaveOutcome {
    fn from(resp: BackendResponse) -> Self {
        if resp.success {
            Self::succeeded(resp.data)
        } else {
            Self::failed(
                resp.msg
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE.to_string()),
            )
        }
    }
}
