use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::agent::AgentTransport;
use crate::config::HubConfig;
use crate::models::{AgentId, Task, TaskId};
use crate::orchestration::{CancellationToken, OrchestrationResult};

/// Executes one task on the agent's host. Runs on a blocking thread.
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &Task, stop: &StopProbe) -> Result<(), String>;
}

/// Lets a running task ask whether the issuer wants it stopped.
#[derive(Clone)]
pub struct StopProbe {
    transport: Arc<dyn AgentTransport>,
    task: TaskId,
}

impl StopProbe {
    pub fn new(transport: Arc<dyn AgentTransport>, task: TaskId) -> Self {
        Self { transport, task }
    }

    /// Transport failures read as "keep going".
    pub fn should_stop(&self) -> bool {
        match self.transport.fetch_task_state(&self.task) {
            Ok(state) => state.stop,
            Err(error) => {
                tracing::warn!(
                    task_id = %self.task,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to fetch task state"
                );
                false
            }
        }
    }
}

pub struct AgentPoller {
    agent: AgentId,
    transport: Arc<dyn AgentTransport>,
    runner: Arc<dyn TaskRunner>,
    poll_interval: Duration,
}

impl AgentPoller {
    pub fn new(
        agent: AgentId,
        transport: Arc<dyn AgentTransport>,
        runner: Arc<dyn TaskRunner>,
        config: &HubConfig,
    ) -> Self {
        Self {
            agent,
            transport,
            runner,
            poll_interval: config.poll_interval,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent
    }

    /// Picks up pending tasks and starts each one in the background.
    /// Must be called from within a Tokio runtime.
    pub fn poll_once(&self) -> OrchestrationResult<Vec<JoinHandle<()>>> {
        let tasks = self.transport.fetch_tasks(&self.agent)?;
        if !tasks.is_empty() {
            tracing::debug!(agent = %self.agent, count = tasks.len(), "fetched tasks");
        }

        Ok(tasks
            .into_iter()
            .map(|task| {
                tokio::spawn(run_task(
                    self.agent.clone(),
                    self.transport.clone(),
                    self.runner.clone(),
                    task,
                ))
            })
            .collect())
    }

    /// Polls every `poll_interval` until `cancellation` fires. Poll failures
    /// are logged and retried on the next tick.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancellation.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(error) = self.poll_once() {
                tracing::warn!(
                    agent = %self.agent,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to fetch tasks"
                );
            }
        }

        tracing::debug!(agent = %self.agent, "stopped polling");
    }
}

async fn run_task(
    agent: AgentId,
    transport: Arc<dyn AgentTransport>,
    runner: Arc<dyn TaskRunner>,
    task: Task,
) {
    let task_id = task.id.clone();
    let probe = StopProbe::new(transport.clone(), task_id.clone());

    let outcome = tokio::task::spawn_blocking(move || runner.run(&task, &probe))
        .await
        .unwrap_or_else(|join_error| Err(format!("task runner join failure: {join_error}")));

    if let Err(error) = &outcome {
        tracing::warn!(agent = %agent, task_id = %task_id, error = %error, "task failed");
    }

    if let Err(error) = transport.record_task_result(&task_id, outcome) {
        tracing::error!(
            agent = %agent,
            task_id = %task_id,
            kind = ?error.kind,
            message = %error.message,
            "failed to record task result"
        );
    }
}
