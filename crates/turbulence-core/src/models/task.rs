use serde::{Deserialize, Serialize};

use crate::models::TaskId;

/// A unit of work handed to exactly one agent.
///
/// The payload carries action-specific options (kill, stress, network, ...)
/// that only the agent interprets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    pub fn with_id(id: impl Into<TaskId>) -> Self {
        Self::new(id, serde_json::Value::Null)
    }

    /// Value of the payload's `"type"` field, if present.
    pub fn kind(&self) -> Option<&str> {
        self.payload.get("type").and_then(serde_json::Value::as_str)
    }
}

/// Outcome of running a task. An empty error means success.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResultRequest {
    #[serde(default)]
    pub error: String,
}

impl ResultRequest {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

impl From<Result<(), String>> for ResultRequest {
    fn from(value: Result<(), String>) -> Self {
        match value {
            Ok(()) => Self::success(),
            Err(error) => Self::failure(error),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub stop: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StateRequest {
    #[serde(default)]
    pub stop: bool,
}

impl From<StateRequest> for State {
    fn from(request: StateRequest) -> Self {
        Self { stop: request.stop }
    }
}
