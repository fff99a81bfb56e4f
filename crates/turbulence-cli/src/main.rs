use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use turbulence_core::agent::{AgentPoller, LocalTransport, StopProbe, TaskRunner};
use turbulence_core::config::HubConfig;
use turbulence_core::fleet::{Instance, StaticFleet};
use turbulence_core::incident::{IncidentExecutor, IncidentRequest, IncidentReport};
use turbulence_core::models::{AgentId, CoreError, CoreErrorKind, Task};
use turbulence_core::orchestration::{CancellationToken, OrchestrationResult, TaskRepo};

const DEFAULT_AGENT_COUNT: usize = 3;
const DEFAULT_TASK_DURATION: Duration = Duration::from_millis(200);
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

const USAGE: &str = "usage: turbulence <incident.json> [--agents N]";

struct CliArgs {
    incident_path: String,
    agent_count: usize,
}

/// Pretends to run a task: sleeps for `duration_ms` from the payload,
/// honoring stop requests, and fails with the payload's `fail` message if set.
struct SimulatedRunner;

impl TaskRunner for SimulatedRunner {
    fn run(&self, task: &Task, stop: &StopProbe) -> Result<(), String> {
        let duration = task
            .payload
            .get("duration_ms")
            .and_then(serde_json::Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TASK_DURATION);

        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            if stop.should_stop() {
                return Err(format!("task '{}' was stopped", task.id));
            }
            std::thread::sleep(STOP_CHECK_INTERVAL);
            elapsed += STOP_CHECK_INTERVAL;
        }

        match task.payload.get("fail").and_then(serde_json::Value::as_str) {
            Some(message) => Err(message.to_string()),
            None => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                if report.has_event_errors() {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(error) => {
                eprintln!("Failed to render incident report: {error}");
                ExitCode::FAILURE
            }
        },
        Err(error) => {
            eprintln!("Incident failed: {error}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut incident_path = None;
    let mut agent_count = DEFAULT_AGENT_COUNT;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--agents" => {
                let raw = args.next().ok_or("--agents requires a value")?;
                agent_count = raw
                    .parse::<usize>()
                    .ok()
                    .filter(|count| *count > 0)
                    .ok_or_else(|| format!("invalid agent count '{raw}'"))?;
            }
            _ if incident_path.is_none() && !arg.starts_with("--") => incident_path = Some(arg),
            _ => return Err(format!("unexpected argument '{arg}'")),
        }
    }

    Ok(CliArgs {
        incident_path: incident_path.ok_or("missing incident file")?,
        agent_count,
    })
}

async fn run(args: CliArgs) -> OrchestrationResult<IncidentReport> {
    let config = HubConfig::from_env()?;
    let request = load_request(&args.incident_path)?;

    let repo = Arc::new(TaskRepo::with_config(&config));
    let transport = Arc::new(LocalTransport::new(repo.clone()));
    let runner: Arc<dyn TaskRunner> = Arc::new(SimulatedRunner);

    let instances: Vec<Instance> = (0..args.agent_count)
        .map(|index| Instance {
            id: format!("vm-{index}"),
            group: "simulated".to_string(),
            deployment: "local".to_string(),
            az: Some(format!("z{}", index % 2 + 1)),
            agent_id: AgentId::new(format!("agent-{index}")),
        })
        .collect();

    let shutdown = CancellationToken::new();
    let pollers: Vec<_> = instances
        .iter()
        .map(|instance| {
            let poller = AgentPoller::new(
                instance.agent_id.clone(),
                transport.clone(),
                runner.clone(),
                &config,
            );
            let shutdown = shutdown.clone();
            tokio::spawn(async move { poller.run(shutdown).await })
        })
        .collect();

    let executor = IncidentExecutor::new(repo, Arc::new(StaticFleet::new(instances)), config);
    let mut incident = executor.start(request)?;

    let stop_requested = tokio::signal::ctrl_c();
    tokio::pin!(stop_requested);
    let report = tokio::select! {
        report = incident.report() => report,
        _ = &mut stop_requested => {
            tracing::warn!(incident_id = %incident.id(), "interrupted, stopping incident");
            incident.request_stop()?;
            incident.report().await
        }
    };

    shutdown.cancel();
    join_pollers(pollers).await;

    report
}

/// Waits for every poller to exit and returns how many of them failed.
async fn join_pollers(pollers: Vec<JoinHandle<()>>) -> usize {
    let mut failures = 0;
    for poller in pollers {
        if let Err(join_error) = poller.await {
            failures += 1;
            tracing::error!(message = %join_error, "agent poller join failure");
        }
    }
    failures
}

fn load_request(path: &str) -> OrchestrationResult<IncidentRequest> {
    let raw = std::fs::read_to_string(path).map_err(|error| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("failed to read incident file '{path}': {error}"),
        )
    })?;
    serde_json::from_str(&raw).map_err(|error| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("failed to parse incident file '{path}': {error}"),
        )
    })
}
