use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{DEFAULT_DISPATCH_TIMEOUT, HubConfig};
use crate::models::{
    AgentId, CoreError, CoreErrorKind, ResultRequest, State, StateRequest, Task, TaskId,
};
use crate::orchestration::{
    OrchestrationResult, Signal, WaitContext, WaitInterrupt, require_agent_id, require_task_id,
};

/// In-memory rendezvous between the incident issuer and polling agents.
///
/// Inboxes, results and stop flags live behind separate locks. No lock is
/// ever held across an await, and no two locks are held at once.
pub struct TaskRepo {
    inboxes: Mutex<HashMap<AgentId, AgentInbox>>,
    results: Mutex<ResultSlots>,
    states: Mutex<HashMap<TaskId, State>>,
    dispatch_timeout: Duration,
}

struct AgentInbox {
    delivered: Arc<Signal>,
    tasks: Vec<Task>,
}

#[derive(Default)]
struct ResultSlots {
    results: HashMap<TaskId, ResultRequest>,
    signals: HashMap<TaskId, Arc<Signal>>,
}

enum Withdrawal {
    Withdrawn,
    AlreadyDelivered,
}

impl Default for TaskRepo {
    fn default() -> Self {
        Self::with_dispatch_timeout(DEFAULT_DISPATCH_TIMEOUT)
    }
}

impl TaskRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &HubConfig) -> Self {
        Self::with_dispatch_timeout(config.dispatch_timeout)
    }

    pub fn with_dispatch_timeout(dispatch_timeout: Duration) -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
            results: Mutex::new(ResultSlots::default()),
            states: Mutex::new(HashMap::new()),
            dispatch_timeout,
        }
    }

    /// Hands `tasks` to `agent` and waits until the agent picks them up or
    /// the configured dispatch timeout elapses.
    pub async fn queue_and_wait(
        &self,
        agent: &AgentId,
        tasks: Vec<Task>,
    ) -> OrchestrationResult<()> {
        let context = WaitContext::with_timeout(self.dispatch_timeout);
        self.queue_and_wait_with(&context, agent, tasks).await
    }

    /// Like [`TaskRepo::queue_and_wait`], bounded by `context` instead of the
    /// configured timeout.
    ///
    /// Success means the batch was delivered, not that any task finished.
    /// When the wait is interrupted only this call's tasks are withdrawn from
    /// the agent's inbox; tasks queued by other dispatches stay put.
    pub async fn queue_and_wait_with(
        &self,
        context: &WaitContext,
        agent: &AgentId,
        tasks: Vec<Task>,
    ) -> OrchestrationResult<()> {
        require_agent_id(agent)?;
        let task_ids = validate_batch(agent, &tasks)?;

        self.register_completion_signals(agent, &task_ids)?;

        let delivered = {
            let mut inboxes = match self.lock_inboxes() {
                Ok(inboxes) => inboxes,
                Err(error) => {
                    self.unregister_completion_signals(&task_ids);
                    return Err(error);
                }
            };
            let inbox = inboxes.entry(agent.clone()).or_insert_with(|| AgentInbox {
                delivered: Arc::new(Signal::new()),
                tasks: Vec::new(),
            });
            inbox.tasks.extend(tasks);
            inbox.delivered.clone()
        };

        let mut pending = PendingDispatch {
            repo: self,
            agent,
            delivered: &delivered,
            task_ids: &task_ids,
            armed: true,
        };

        match context.run(delivered.wait()).await {
            Ok(()) => {
                pending.disarm();
                tracing::debug!(
                    agent = %agent,
                    count = task_ids.len(),
                    "finished waiting since agent consumed tasks"
                );
                Ok(())
            }
            Err(interrupt) => match pending.withdraw()? {
                Withdrawal::AlreadyDelivered => {
                    tracing::debug!(
                        agent = %agent,
                        "agent consumed tasks as the dispatch wait was interrupted"
                    );
                    Ok(())
                }
                Withdrawal::Withdrawn => Err(dispatch_interrupted(agent, interrupt)),
            },
        }
    }

    /// Drains everything queued for `agent`, releasing the dispatchers
    /// waiting on it. Returns an empty batch when nothing is pending.
    pub fn consume(&self, agent: &AgentId) -> OrchestrationResult<Vec<Task>> {
        require_agent_id(agent)?;

        let mut inboxes = self.lock_inboxes()?;
        let Some(inbox) = inboxes.remove(agent) else {
            return Ok(Vec::new());
        };

        inbox.delivered.fire();
        tracing::debug!(agent = %agent, count = inbox.tasks.len(), "consumed tasks for agent");

        Ok(inbox.tasks)
    }

    /// Waits without a deadline for the result of a queued task.
    pub async fn wait(&self, task: &TaskId) -> OrchestrationResult<ResultRequest> {
        self.wait_with(&WaitContext::background(), task).await
    }

    pub async fn wait_with(
        &self,
        context: &WaitContext,
        task: &TaskId,
    ) -> OrchestrationResult<ResultRequest> {
        require_task_id(task)?;

        let signal = {
            let slots = self.lock_results()?;
            slots.signals.get(task).cloned().ok_or_else(|| {
                CoreError::for_task(
                    task,
                    CoreErrorKind::NotQueued,
                    format!("waiting for task '{task}' must happen after queueing"),
                )
            })?
        };

        context
            .run(signal.wait())
            .await
            .map_err(|interrupt| result_wait_interrupted(task, interrupt))?;

        let slots = self.lock_results()?;
        slots.results.get(task).cloned().ok_or_else(|| {
            CoreError::for_task(
                task,
                CoreErrorKind::NotQueued,
                format!("result for task '{task}' was forgotten before it was read"),
            )
        })
    }

    /// Stores the result for `task` and releases its waiters.
    ///
    /// A later result overwrites an earlier one, but waiters are only
    /// released once.
    pub fn update(&self, task: &TaskId, result: ResultRequest) -> OrchestrationResult<()> {
        require_task_id(task)?;

        let mut slots = self.lock_results()?;
        slots.results.insert(task.clone(), result);

        match slots.signals.get(task) {
            Some(signal) => {
                if signal.fire() {
                    tracing::debug!(task_id = %task, "updated task");
                } else {
                    tracing::warn!(task_id = %task, "received duplicate result for task");
                }
            }
            None => {
                tracing::warn!(task_id = %task, "stored result for task that was never queued");
            }
        }

        Ok(())
    }

    pub fn fetch_state(&self, task: &TaskId) -> OrchestrationResult<State> {
        require_task_id(task)?;

        let states = self.lock_states()?;
        Ok(states.get(task).copied().unwrap_or_default())
    }

    pub fn update_state(
        &self,
        task: &TaskId,
        request: StateRequest,
    ) -> OrchestrationResult<()> {
        require_task_id(task)?;

        let mut states = self.lock_states()?;
        states.insert(task.clone(), State::from(request));

        Ok(())
    }

    /// Drops the stored result, completion signal and stop flag for `task`.
    ///
    /// Nothing is evicted unless the issuer calls this once it has read the
    /// outcome.
    pub fn forget(&self, task: &TaskId) -> OrchestrationResult<()> {
        require_task_id(task)?;

        {
            let mut slots = self.lock_results()?;
            slots.results.remove(task);
            slots.signals.remove(task);
        }
        self.lock_states()?.remove(task);

        Ok(())
    }

    /// Agents that currently have undelivered tasks, sorted.
    pub fn pending_agents(&self) -> OrchestrationResult<Vec<AgentId>> {
        let inboxes = self.lock_inboxes()?;
        let mut agents: Vec<AgentId> = inboxes.keys().cloned().collect();
        agents.sort();
        Ok(agents)
    }
}

impl TaskRepo {
    fn register_completion_signals(
        &self,
        agent: &AgentId,
        task_ids: &[TaskId],
    ) -> OrchestrationResult<()> {
        let mut slots = self.lock_results()?;

        if let Some(task) = task_ids.iter().find(|task| slots.signals.contains_key(*task)) {
            return Err(CoreError {
                agent: Some(agent.clone()),
                task: Some(task.clone()),
                kind: CoreErrorKind::InvalidInput,
                message: format!("task '{task}' is already queued"),
            });
        }

        for task in task_ids {
            slots.signals.insert(task.clone(), Arc::new(Signal::new()));
        }

        Ok(())
    }

    fn unregister_completion_signals(&self, task_ids: &[TaskId]) {
        match self.lock_results() {
            Ok(mut slots) => {
                for task in task_ids {
                    slots.signals.remove(task);
                }
            }
            Err(error) => {
                tracing::error!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to clean up completion signals"
                );
            }
        }
    }

    /// Pulls this dispatch's tasks back out of the agent's inbox unless the
    /// agent already took the batch.
    fn withdraw(
        &self,
        agent: &AgentId,
        delivered: &Arc<Signal>,
        task_ids: &[TaskId],
    ) -> OrchestrationResult<Withdrawal> {
        {
            let mut inboxes = self.lock_inboxes()?;

            // Consume fires under this lock, so the check cannot race with it.
            if delivered.is_fired() {
                return Ok(Withdrawal::AlreadyDelivered);
            }

            if let Some(inbox) = inboxes.get_mut(agent)
                && Arc::ptr_eq(&inbox.delivered, delivered)
            {
                inbox.tasks.retain(|task| !task_ids.contains(&task.id));
                if inbox.tasks.is_empty() {
                    inboxes.remove(agent);
                }
            }
        }

        self.unregister_completion_signals(task_ids);
        Ok(Withdrawal::Withdrawn)
    }

    fn lock_inboxes(&self) -> OrchestrationResult<MutexGuard<'_, HashMap<AgentId, AgentInbox>>> {
        self.inboxes
            .lock()
            .map_err(|_| poisoned("agent inbox mutex poisoned"))
    }

    fn lock_results(&self) -> OrchestrationResult<MutexGuard<'_, ResultSlots>> {
        self.results
            .lock()
            .map_err(|_| poisoned("task result mutex poisoned"))
    }

    fn lock_states(&self) -> OrchestrationResult<MutexGuard<'_, HashMap<TaskId, State>>> {
        self.states
            .lock()
            .map_err(|_| poisoned("task state mutex poisoned"))
    }
}

/// Withdraws a dispatch whose future is dropped before it resolved.
struct PendingDispatch<'a> {
    repo: &'a TaskRepo,
    agent: &'a AgentId,
    delivered: &'a Arc<Signal>,
    task_ids: &'a [TaskId],
    armed: bool,
}

impl PendingDispatch<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }

    fn withdraw(&mut self) -> OrchestrationResult<Withdrawal> {
        self.armed = false;
        self.repo.withdraw(self.agent, self.delivered, self.task_ids)
    }
}

impl Drop for PendingDispatch<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(error) = self.repo.withdraw(self.agent, self.delivered, self.task_ids) {
            tracing::error!(
                agent = %self.agent,
                kind = ?error.kind,
                message = %error.message,
                "failed to withdraw abandoned dispatch"
            );
        }
    }
}

fn validate_batch(agent: &AgentId, tasks: &[Task]) -> OrchestrationResult<Vec<TaskId>> {
    if tasks.is_empty() {
        return Err(CoreError::for_agent(
            agent,
            CoreErrorKind::InvalidInput,
            format!("must provide at least one task for agent '{agent}'"),
        ));
    }

    let mut seen = HashSet::with_capacity(tasks.len());
    let mut task_ids = Vec::with_capacity(tasks.len());
    for task in tasks {
        require_task_id(&task.id)?;
        if !seen.insert(&task.id) {
            return Err(CoreError {
                agent: Some(agent.clone()),
                task: Some(task.id.clone()),
                kind: CoreErrorKind::InvalidInput,
                message: format!("task '{}' appears more than once in the batch", task.id),
            });
        }
        task_ids.push(task.id.clone());
    }

    Ok(task_ids)
}

fn dispatch_interrupted(agent: &AgentId, interrupt: WaitInterrupt) -> CoreError {
    match interrupt {
        WaitInterrupt::DeadlineExceeded => {
            tracing::error!(agent = %agent, "timed out waiting for agent to consume tasks");
            CoreError::for_agent(
                agent,
                CoreErrorKind::Timeout,
                format!("timed out waiting for agent '{agent}' to consume tasks"),
            )
        }
        WaitInterrupt::Cancelled => CoreError::for_agent(
            agent,
            CoreErrorKind::Cancelled,
            format!("cancelled waiting for agent '{agent}' to consume tasks"),
        ),
    }
}

fn result_wait_interrupted(task: &TaskId, interrupt: WaitInterrupt) -> CoreError {
    match interrupt {
        WaitInterrupt::DeadlineExceeded => CoreError::for_task(
            task,
            CoreErrorKind::Timeout,
            format!("timed out waiting for task '{task}' result"),
        ),
        WaitInterrupt::Cancelled => CoreError::for_task(
            task,
            CoreErrorKind::Cancelled,
            format!("cancelled waiting for task '{task}' result"),
        ),
    }
}

fn poisoned(message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::Internal, message)
}
