use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::fleet::{Fleet, Instance};
use crate::incident::{Event, IncidentReport, IncidentRequest};
use crate::models::{CoreError, CoreErrorKind, StateRequest, Task, TaskId};
use crate::orchestration::{OrchestrationResult, TaskRepo, WaitContext};

/// Issues incidents: hands tasks to the agents of the selected instances and
/// collects one event per task.
pub struct IncidentExecutor {
    repo: Arc<TaskRepo>,
    fleet: Arc<dyn Fleet>,
    config: HubConfig,
    next_incident_id: AtomicU64,
}

pub struct RunningIncident {
    id: String,
    task_ids: Vec<TaskId>,
    repo: Arc<TaskRepo>,
    join_handle: JoinHandle<IncidentReport>,
    outcome: Option<OrchestrationResult<IncidentReport>>,
}

impl IncidentExecutor {
    pub fn new(repo: Arc<TaskRepo>, fleet: Arc<dyn Fleet>, config: HubConfig) -> Self {
        Self {
            repo,
            fleet,
            config,
            next_incident_id: AtomicU64::new(1),
        }
    }

    pub async fn execute(&self, request: IncidentRequest) -> OrchestrationResult<IncidentReport> {
        self.start(request)?.report().await
    }

    /// Starts the incident in the background. Must be called from within a Tokio runtime.
    pub fn start(&self, request: IncidentRequest) -> OrchestrationResult<RunningIncident> {
        request.validate()?;

        let incident_id = format!(
            "incident-{}",
            self.next_incident_id.fetch_add(1, Ordering::SeqCst)
        );
        let instances: Vec<Instance> = self
            .fleet
            .instances()?
            .into_iter()
            .filter(|instance| request.selector.matches(instance))
            .collect();

        let mut next_task = 0_u64;
        let mut batches: Vec<(Instance, Vec<Task>)> = Vec::with_capacity(instances.len());
        for instance in instances {
            let mut tasks = Vec::with_capacity(request.tasks.len());
            for options in &request.tasks {
                next_task += 1;
                tasks.push(Task::new(
                    format!("{incident_id}-{next_task}"),
                    options.clone(),
                ));
            }
            batches.push((instance, tasks));
        }

        let task_ids: Vec<TaskId> = batches
            .iter()
            .flat_map(|(_, tasks)| tasks.iter().map(|task| task.id.clone()))
            .collect();

        tracing::info!(
            incident_id = %incident_id,
            instances = batches.len(),
            tasks = task_ids.len(),
            "starting incident"
        );

        let join_handle = tokio::spawn(run_incident(
            self.repo.clone(),
            self.config,
            incident_id.clone(),
            batches,
        ));

        Ok(RunningIncident {
            id: incident_id,
            task_ids,
            repo: self.repo.clone(),
            join_handle,
            outcome: None,
        })
    }
}

impl RunningIncident {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_ids(&self) -> &[TaskId] {
        &self.task_ids
    }

    /// Raises the stop flag on every task of the incident. Agents observe it
    /// the next time they check task state.
    pub fn request_stop(&self) -> OrchestrationResult<()> {
        for task in &self.task_ids {
            self.repo.update_state(task, StateRequest { stop: true })?;
        }
        tracing::info!(incident_id = %self.id, "requested incident stop");
        Ok(())
    }

    /// Waits for every instance to finish. Dropping the returned future
    /// leaves the incident running. Once resolved, later calls return the
    /// same outcome.
    pub async fn report(&mut self) -> OrchestrationResult<IncidentReport> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let outcome = (&mut self.join_handle).await.map_err(|join_error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("incident '{}' join failure: {join_error}", self.id),
            )
        });
        self.outcome = Some(outcome.clone());
        outcome
    }
}

async fn run_incident(
    repo: Arc<TaskRepo>,
    config: HubConfig,
    incident_id: String,
    batches: Vec<(Instance, Vec<Task>)>,
) -> IncidentReport {
    let started_at = SystemTime::now();

    let handles: Vec<_> = batches
        .into_iter()
        .map(|(instance, tasks)| {
            tokio::spawn(run_on_instance(repo.clone(), config, instance, tasks))
        })
        .collect();

    let mut events = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(instance_events) => events.extend(instance_events),
            Err(join_error) => {
                tracing::error!(
                    incident_id = %incident_id,
                    message = %join_error,
                    "instance execution join failure"
                );
            }
        }
    }

    let report = IncidentReport {
        id: incident_id,
        events,
        execution_started_at: started_at,
        execution_completed_at: Some(SystemTime::now()),
    };
    tracing::info!(
        incident_id = %report.id,
        events = report.events.len(),
        errors = report.has_event_errors(),
        "finished incident"
    );
    report
}

async fn run_on_instance(
    repo: Arc<TaskRepo>,
    config: HubConfig,
    instance: Instance,
    tasks: Vec<Task>,
) -> Vec<Event> {
    let started_at = SystemTime::now();
    let mut events: Vec<Event> = tasks
        .iter()
        .map(|task| Event::started(task, &instance, started_at))
        .collect();

    let dispatch = WaitContext::with_timeout(config.dispatch_timeout);
    if let Err(error) = repo
        .queue_and_wait_with(&dispatch, &instance.agent_id, tasks)
        .await
    {
        for event in &mut events {
            event.fail(error.message.clone());
        }
        return events;
    }

    let waits: Vec<_> = events
        .iter()
        .map(|event| {
            let repo = repo.clone();
            let task = event.id.clone();
            let context = WaitContext::with_optional_timeout(config.result_timeout);
            tokio::spawn(async move { repo.wait_with(&context, &task).await })
        })
        .collect();

    for (event, handle) in events.iter_mut().zip(waits) {
        match handle.await {
            Ok(Ok(result)) => event.complete(result),
            Ok(Err(error)) => event.fail(error.message),
            Err(join_error) => event.fail(format!("result wait join failure: {join_error}")),
        }
    }

    events
}
