use thiserror::Error;

use crate::models::{AgentId, TaskId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    NotQueued,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub agent: Option<AgentId>,
    pub task: Option<TaskId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            agent: None,
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_agent(agent: &AgentId, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.clone()),
            ..Self::new(kind, message)
        }
    }

    pub fn for_task(task: &TaskId, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: Some(task.clone()),
            ..Self::new(kind, message)
        }
    }
}
