use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use turbulence_core::models::{
    AgentId, CoreErrorKind, ResultRequest, State, StateRequest, Task, TaskId,
};
use turbulence_core::orchestration::TaskRepo;

fn agent(id: &str) -> AgentId {
    AgentId::new(id)
}

fn task(id: &str) -> TaskId {
    TaskId::new(id)
}

fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|task| task.id.as_str()).collect()
}

#[test]
fn consume_without_dispatch_returns_empty_batch() {
    let repo = TaskRepo::new();
    assert!(repo.consume(&agent("agent-0")).unwrap().is_empty());
}

#[test]
fn consume_rejects_empty_agent_id() {
    let repo = TaskRepo::new();
    let error = repo.consume(&agent("")).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[test]
fn empty_task_ids_are_rejected_everywhere() {
    let repo = TaskRepo::new();
    let empty = task("");

    assert_eq!(
        repo.update(&empty, ResultRequest::success()).unwrap_err().kind,
        CoreErrorKind::InvalidInput
    );
    assert_eq!(
        repo.fetch_state(&empty).unwrap_err().kind,
        CoreErrorKind::InvalidInput
    );
    assert_eq!(
        repo.update_state(&empty, StateRequest { stop: true }).unwrap_err().kind,
        CoreErrorKind::InvalidInput
    );
    assert_eq!(
        repo.forget(&empty).unwrap_err().kind,
        CoreErrorKind::InvalidInput
    );
}

#[tokio::test]
async fn wait_on_empty_task_id_is_rejected() {
    let repo = TaskRepo::new();
    let error = repo.wait(&task("")).await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[tokio::test]
async fn dispatch_rejects_malformed_batches() {
    let repo = TaskRepo::new();

    let error = repo
        .queue_and_wait(&agent(""), vec![Task::with_id("t1")])
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let error = repo
        .queue_and_wait(&agent("agent-1"), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert_eq!(error.agent, Some(agent("agent-1")));

    let error = repo
        .queue_and_wait(
            &agent("agent-1"),
            vec![Task::with_id("t1"), Task::with_id("t1")],
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert_eq!(error.task, Some(task("t1")));

    let error = repo
        .queue_and_wait(&agent("agent-1"), vec![Task::with_id("")])
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    // Nothing from the rejected calls may linger.
    assert!(repo.pending_agents().unwrap().is_empty());
    assert_eq!(
        repo.wait(&task("t1")).await.unwrap_err().kind,
        CoreErrorKind::NotQueued
    );
}

#[tokio::test]
async fn dispatch_returns_once_agent_consumes_batch() {
    let repo = TaskRepo::new();
    let agent_1 = agent("agent-1");

    let (dispatched, consumed) = tokio::join!(
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t1")]),
        async { repo.consume(&agent_1) },
    );

    dispatched.unwrap();
    assert_eq!(ids(&consumed.unwrap()), ["t1"]);
    assert!(repo.consume(&agent_1).unwrap().is_empty());
}

#[tokio::test]
async fn successive_dispatches_accumulate_in_order_until_consumed() {
    let repo = TaskRepo::new();
    let agent_1 = agent("agent-1");

    let (first, second, consumed) = tokio::join!(
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t1"), Task::with_id("t2")]),
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t3")]),
        async { repo.consume(&agent_1) },
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(ids(&consumed.unwrap()), ["t1", "t2", "t3"]);
}

#[tokio::test]
async fn racing_consumers_see_the_batch_exactly_once() {
    let repo = TaskRepo::new();
    let agent_1 = agent("agent-1");

    let (dispatched, first, second) = tokio::join!(
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t1")]),
        async { repo.consume(&agent_1) },
        async { repo.consume(&agent_1) },
    );

    dispatched.unwrap();
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.len() + second.len(), 1);
}

#[tokio::test]
async fn dispatching_an_already_queued_task_is_rejected() {
    let repo = TaskRepo::new();
    let agent_1 = agent("agent-1");

    let agent_2 = agent("agent-2");
    let (first, second, _) = tokio::join!(
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t1")]),
        repo.queue_and_wait(&agent_2, vec![Task::with_id("t1")]),
        async { repo.consume(&agent_1) },
    );

    first.unwrap();
    let error = second.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert_eq!(error.task, Some(task("t1")));
    assert!(repo.consume(&agent("agent-2")).unwrap().is_empty());
}

#[tokio::test]
async fn wait_before_queue_fails_without_blocking() {
    let repo = TaskRepo::new();
    let outcome = tokio::time::timeout(Duration::from_millis(100), repo.wait(&task("ghost")))
        .await
        .expect("wait should not block");

    let error = outcome.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NotQueued);
    assert_eq!(error.task, Some(task("ghost")));
}

#[tokio::test]
async fn result_posted_before_wait_is_returned() {
    let repo = TaskRepo::new();
    let agent_3 = agent("agent-3");
    let (dispatched, _) = tokio::join!(
        repo.queue_and_wait(&agent_3, vec![Task::with_id("t3")]),
        async { repo.consume(&agent_3) },
    );
    dispatched.unwrap();

    repo.update(&task("t3"), ResultRequest::failure("boom"))
        .unwrap();

    let result = repo.wait(&task("t3")).await.unwrap();
    assert_eq!(result, ResultRequest::failure("boom"));
    assert!(!result.is_success());
}

#[tokio::test]
async fn result_posted_after_wait_releases_the_waiter() {
    let repo = TaskRepo::new();
    let agent_1 = agent("agent-1");
    let (dispatched, _) = tokio::join!(
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t1")]),
        async { repo.consume(&agent_1) },
    );
    dispatched.unwrap();

    let t1 = task("t1");
    let (result, updated) = tokio::join!(repo.wait(&t1), async {
        tokio::task::yield_now().await;
        repo.update(&task("t1"), ResultRequest::success())
    });

    updated.unwrap();
    assert_eq!(result.unwrap(), ResultRequest::success());
}

#[tokio::test]
async fn duplicate_results_overwrite_without_refiring() {
    let repo = TaskRepo::new();
    let agent_1 = agent("agent-1");
    let (dispatched, _) = tokio::join!(
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t1")]),
        async { repo.consume(&agent_1) },
    );
    dispatched.unwrap();

    repo.update(&task("t1"), ResultRequest::failure("first"))
        .unwrap();
    repo.update(&task("t1"), ResultRequest::failure("second"))
        .unwrap();

    assert_eq!(
        repo.wait(&task("t1")).await.unwrap(),
        ResultRequest::failure("second")
    );
}

#[test]
fn result_for_unknown_task_is_stored_without_error() {
    let repo = TaskRepo::new();
    repo.update(&task("late"), ResultRequest::failure("too late"))
        .unwrap();
}

#[test]
fn stop_flag_defaults_to_false_and_can_be_raised() {
    let repo = TaskRepo::new();
    let t1 = task("t1");

    assert_eq!(repo.fetch_state(&t1).unwrap(), State::default());
    assert!(!repo.fetch_state(&t1).unwrap().stop);

    repo.update_state(&t1, StateRequest { stop: true }).unwrap();
    assert!(repo.fetch_state(&t1).unwrap().stop);

    repo.update_state(&t1, StateRequest { stop: false }).unwrap();
    assert!(!repo.fetch_state(&t1).unwrap().stop);
}

#[tokio::test]
async fn forget_evicts_result_signal_and_state() {
    let repo = TaskRepo::new();
    let agent_1 = agent("agent-1");
    let (dispatched, _) = tokio::join!(
        repo.queue_and_wait(&agent_1, vec![Task::with_id("t1")]),
        async { repo.consume(&agent_1) },
    );
    dispatched.unwrap();
    repo.update(&task("t1"), ResultRequest::success()).unwrap();
    repo.update_state(&task("t1"), StateRequest { stop: true }).unwrap();

    repo.forget(&task("t1")).unwrap();

    assert_eq!(
        repo.wait(&task("t1")).await.unwrap_err().kind,
        CoreErrorKind::NotQueued
    );
    assert!(!repo.fetch_state(&task("t1")).unwrap().stop);
}

#[tokio::test]
async fn pending_agents_lists_undelivered_inboxes() {
    let repo = TaskRepo::new();

    let agent_b = agent("agent-b");
    let agent_a = agent("agent-a");
    let (first, second, pending) = tokio::join!(
        repo.queue_and_wait(&agent_b, vec![Task::with_id("t1")]),
        repo.queue_and_wait(&agent_a, vec![Task::with_id("t2")]),
        async {
            let pending = repo.pending_agents().unwrap();
            repo.consume(&agent("agent-a")).unwrap();
            repo.consume(&agent("agent-b")).unwrap();
            pending
        },
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(pending, vec![agent("agent-a"), agent("agent-b")]);
    assert!(repo.pending_agents().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_agents_and_dispatchers_rendezvous_concurrently() {
    const AGENTS: usize = 16;
    const TASKS_PER_AGENT: usize = 5;

    let repo = Arc::new(TaskRepo::new());

    let mut dispatchers = Vec::new();
    for agent_index in 0..AGENTS {
        let repo = repo.clone();
        dispatchers.push(tokio::spawn(async move {
            let agent_id = AgentId::new(format!("agent-{agent_index}"));
            let tasks: Vec<Task> = (0..TASKS_PER_AGENT)
                .map(|task_index| Task::with_id(format!("t-{agent_index}-{task_index}")))
                .collect();
            let task_ids: Vec<TaskId> = tasks.iter().map(|task| task.id.clone()).collect();

            repo.queue_and_wait(&agent_id, tasks).await?;

            let mut results = Vec::new();
            for task_id in task_ids {
                results.push(repo.wait(&task_id).await?);
            }
            Ok::<_, turbulence_core::models::CoreError>(results)
        }));
    }

    let mut agents = Vec::new();
    for agent_index in 0..AGENTS {
        let repo = repo.clone();
        agents.push(tokio::spawn(async move {
            let agent_id = AgentId::new(format!("agent-{agent_index}"));
            let mut seen = Vec::new();
            while seen.len() < TASKS_PER_AGENT {
                for task in repo.consume(&agent_id).unwrap() {
                    repo.update(&task.id, ResultRequest::success()).unwrap();
                    seen.push(task.id);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            seen
        }));
    }

    let mut delivered = HashSet::new();
    for handle in agents {
        let seen = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        for task_id in seen {
            assert!(delivered.insert(task_id), "task delivered twice");
        }
    }
    assert_eq!(delivered.len(), AGENTS * TASKS_PER_AGENT);

    for handle in dispatchers {
        let results = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), TASKS_PER_AGENT);
        assert!(results.iter().all(ResultRequest::is_success));
    }
}
