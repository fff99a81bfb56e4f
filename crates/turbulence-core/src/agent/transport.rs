use std::sync::Arc;

use crate::models::{AgentId, ResultRequest, State, Task, TaskId};
use crate::orchestration::{OrchestrationResult, TaskRepo};

/// What an agent needs from the hub: pick up work, check stop flags, report results.
pub trait AgentTransport: Send + Sync {
    fn fetch_tasks(&self, agent: &AgentId) -> OrchestrationResult<Vec<Task>>;

    fn fetch_task_state(&self, task: &TaskId) -> OrchestrationResult<State>;

    fn record_task_result(
        &self,
        task: &TaskId,
        outcome: Result<(), String>,
    ) -> OrchestrationResult<()>;
}

/// Binds agents running in the same process directly onto a hub.
#[derive(Clone)]
pub struct LocalTransport {
    repo: Arc<TaskRepo>,
}

impl LocalTransport {
    pub fn new(repo: Arc<TaskRepo>) -> Self {
        Self { repo }
    }
}

impl AgentTransport for LocalTransport {
    fn fetch_tasks(&self, agent: &AgentId) -> OrchestrationResult<Vec<Task>> {
        self.repo.consume(agent)
    }

    fn fetch_task_state(&self, task: &TaskId) -> OrchestrationResult<State> {
        self.repo.fetch_state(task)
    }

    fn record_task_result(
        &self,
        task: &TaskId,
        outcome: Result<(), String>,
    ) -> OrchestrationResult<()> {
        self.repo.update(task, ResultRequest::from(outcome))
    }
}
