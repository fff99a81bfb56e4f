pub mod signal;
pub mod task_repo;
pub mod wait_context;

pub use signal::Signal;
pub use task_repo::TaskRepo;
pub use wait_context::{CancellationToken, WaitContext, WaitInterrupt};

use crate::models::{AgentId, CoreError, CoreErrorKind, TaskId};

pub type OrchestrationResult<T> = Result<T, CoreError>;

pub(crate) fn require_agent_id(agent: &AgentId) -> OrchestrationResult<()> {
    if agent.is_empty() {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "must provide non-empty agent id",
        ));
    }
    Ok(())
}

pub(crate) fn require_task_id(task: &TaskId) -> OrchestrationResult<()> {
    if task.is_empty() {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "must provide non-empty task id",
        ));
    }
    Ok(())
}
