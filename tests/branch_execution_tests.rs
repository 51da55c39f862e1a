//! Branch execution: dispatch modes, recovery strategies, isolation,
//! cancellation, and degradation under collaborator anomalies.

mod common;

use branch_coordinator::events::EventType;
use branch_coordinator::models::RecoveryStrategy;
use branch_coordinator::orchestration::{
    BranchConfig, BranchCoordinator, InMemoryRunStateStore,
};
use branch_coordinator::state_machine::{BranchState, StepState};
use common::{
    loc, test_run, FailingNavigator, MockNavigator, RecordingEventBus, ScriptedStepExecutor,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

fn coordinator() -> (BranchCoordinator, Arc<RecordingEventBus>) {
    let bus = Arc::new(RecordingEventBus::default());
    let coordinator = BranchCoordinator::new(Arc::new(InMemoryRunStateStore::new()), bus.clone());
    (coordinator, bus)
}

#[tokio::test]
async fn empty_input_yields_empty_results() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let results = coordinator
        .execute_branches(
            &run,
            Vec::new(),
            Arc::new(MockNavigator::new()),
            Arc::new(ScriptedStepExecutor::new()),
        )
        .await;

    assert!(results.is_empty());
    assert!(bus.events().is_empty());
}

#[tokio::test]
async fn parallel_branches_execute_and_merge_end_to_end() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let navigator = Arc::new(
        MockNavigator::new().with_parallel_paths("split-1", vec![vec![loc("sA")], vec![loc("sB")]]),
    );
    let executor = Arc::new(
        ScriptedStepExecutor::new()
            .succeed_with("sA", json!({"x": "A"}))
            .succeed_with("sB", json!({"x": "B"})),
    );

    let branches = coordinator
        .create_branches_with_count(run.id, "split-1", 2)
        .await
        .unwrap();
    let results = coordinator
        .execute_branches(&run, branches, navigator, executor)
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.success));
    assert_eq!(results[0].outputs.get("x"), Some(&json!("A")));
    assert_eq!(results[1].outputs.get("x"), Some(&json!("B")));

    let merged = coordinator.merge_branch_results(&run.context, &results);
    assert_eq!(merged.variables.get("x_merged"), Some(&json!(["A", "B"])));

    assert_eq!(bus.count_of(EventType::StepStarted), 2);
    assert_eq!(bus.count_of(EventType::StepCompleted), 2);
    assert_eq!(bus.count_of(EventType::ContextUpdated), 2);
    assert_eq!(bus.count_of(EventType::BranchCompleted), 2);
    assert_eq!(bus.count_of(EventType::BranchFailed), 0);
}

#[tokio::test]
async fn parent_context_is_never_mutated_by_execution() {
    let (coordinator, _bus) = coordinator();
    let mut run = test_run(RecoveryStrategy::Fail);
    run.context
        .blackboard
        .insert("seed".into(), json!({"count": 1}));
    let before = run.context.clone();

    let navigator = Arc::new(
        MockNavigator::new().with_parallel_paths("split-1", vec![vec![loc("sA")], vec![loc("sB")]]),
    );
    let executor = Arc::new(
        ScriptedStepExecutor::new()
            .succeed_with("sA", json!({"x": 1}))
            .succeed_with("sB", json!({"y": 2})),
    );

    let branches = coordinator
        .create_branches_with_count(run.id, "split-1", 2)
        .await
        .unwrap();
    let results = coordinator
        .execute_branches(&run, branches, navigator, executor)
        .await;

    assert!(results.iter().all(|result| result.success));
    assert_eq!(run.context, before);
}

#[tokio::test]
async fn branch_index_drift_clamps_to_last_available_path() {
    let (coordinator, _bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    // Three branches created, but the graph only reports two paths now.
    let navigator = Arc::new(
        MockNavigator::new().with_parallel_paths("split-1", vec![vec![loc("pA")], vec![loc("pB")]]),
    );
    let executor = Arc::new(ScriptedStepExecutor::new());

    let branches = coordinator
        .create_branches_with_count(run.id, "split-1", 3)
        .await
        .unwrap();
    let results = coordinator
        .execute_branches(&run, branches, navigator, executor.clone())
        .await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|result| result.success));

    let mut invocations = executor.invocations();
    invocations.sort();
    assert_eq!(invocations, vec!["pA", "pB", "pB"]);
}

#[tokio::test]
async fn fail_strategy_halts_branch_at_first_failed_step() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let config = BranchConfig::sequential("entry")
        .with_predefined_paths(vec![vec![loc("s1"), loc("s2"), loc("s3")]]);
    let branches = coordinator
        .create_branches_from_config(run.id, &config, None)
        .await
        .unwrap();
    let executor = Arc::new(ScriptedStepExecutor::new().fail_step("s2", "validation blew up"));

    let results = coordinator
        .execute_branches(
            &run,
            branches.clone(),
            Arc::new(MockNavigator::new()),
            executor.clone(),
        )
        .await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.completed_steps, 1);
    assert_eq!(result.failed_steps, 1);
    assert_eq!(result.skipped_steps, 1);
    assert_eq!(executor.invocations(), vec!["s1", "s2"]);

    let branch = coordinator.get_branch_status(branches[0].id).unwrap();
    assert_eq!(branch.state, BranchState::Failed);
    let states: Vec<StepState> = branch
        .step_statuses
        .iter()
        .map(|status| status.state)
        .collect();
    assert_eq!(
        states,
        vec![StepState::Completed, StepState::Failed, StepState::Skipped]
    );
    // The unattempted step was never started.
    assert!(branch.step_statuses[2].started_at.is_none());

    assert_eq!(bus.count_of(EventType::StepFailed), 1);
    assert_eq!(bus.count_of(EventType::BranchFailed), 1);
    assert_eq!(bus.count_of(EventType::BranchCompleted), 0);
}

#[tokio::test]
async fn skip_strategy_attempts_every_step_and_reports_success() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Skip);

    let config = BranchConfig::sequential("entry")
        .with_predefined_paths(vec![vec![loc("s1"), loc("s2"), loc("s3")]]);
    let branches = coordinator
        .create_branches_from_config(run.id, &config, None)
        .await
        .unwrap();
    let executor = Arc::new(ScriptedStepExecutor::new().fail_step("s2", "validation blew up"));

    let results = coordinator
        .execute_branches(&run, branches, Arc::new(MockNavigator::new()), executor.clone())
        .await;

    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.completed_steps, 2);
    assert_eq!(result.failed_steps, 1);
    assert_eq!(result.skipped_steps, 0);
    assert_eq!(executor.invocations(), vec!["s1", "s2", "s3"]);
    assert_eq!(bus.count_of(EventType::BranchCompleted), 1);
}

#[tokio::test]
async fn retry_strategy_currently_behaves_like_skip() {
    let (coordinator, _bus) = coordinator();
    let run = test_run(RecoveryStrategy::Retry);

    let config = BranchConfig::sequential("entry")
        .with_predefined_paths(vec![vec![loc("s1"), loc("s2")]]);
    let branches = coordinator
        .create_branches_from_config(run.id, &config, None)
        .await
        .unwrap();
    let executor = Arc::new(ScriptedStepExecutor::new().fail_step("s1", "flaky"));

    let results = coordinator
        .execute_branches(&run, branches, Arc::new(MockNavigator::new()), executor.clone())
        .await;

    assert!(results[0].success);
    assert_eq!(results[0].failed_steps, 1);
    assert_eq!(executor.invocations(), vec!["s1", "s2"]);
}

#[tokio::test]
async fn sequential_run_halts_remaining_branches_under_fail_strategy() {
    let (coordinator, _bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let first = coordinator
        .create_sequential_branch(run.id, "doomed-step")
        .await
        .unwrap();
    let second = coordinator
        .create_sequential_branch(run.id, "healthy-step")
        .await
        .unwrap();
    let executor =
        Arc::new(ScriptedStepExecutor::new().fail_step("doomed-step", "no database"));

    let results = coordinator
        .execute_branches(
            &run,
            vec![first, second.clone()],
            Arc::new(MockNavigator::new()),
            executor.clone(),
        )
        .await;

    // The second branch was never attempted and is absent from the results.
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(executor.invocations(), vec!["doomed-step"]);
    assert_eq!(
        coordinator.get_branch_status(second.id).unwrap().state,
        BranchState::Pending
    );
}

#[tokio::test]
async fn executor_errors_are_recorded_as_failed_steps() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Skip);

    let config = BranchConfig::sequential("entry")
        .with_predefined_paths(vec![vec![loc("e1"), loc("e2")]]);
    let branches = coordinator
        .create_branches_from_config(run.id, &config, None)
        .await
        .unwrap();
    let executor = Arc::new(ScriptedStepExecutor::new().error_step("e1", "connection reset"));

    let results = coordinator
        .execute_branches(&run, branches, Arc::new(MockNavigator::new()), executor.clone())
        .await;

    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.failed_steps, 1);
    assert_eq!(result.completed_steps, 1);
    assert_eq!(executor.invocations(), vec!["e1", "e2"]);

    let failed_events = bus.of_type(EventType::StepFailed);
    assert_eq!(failed_events.len(), 1);
}

#[tokio::test]
async fn navigator_failure_becomes_a_failed_branch_result() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let branches = coordinator
        .create_branches_with_count(run.id, "split-1", 1)
        .await
        .unwrap();
    let branch_id = branches[0].id;

    let results = coordinator
        .execute_branches(
            &run,
            branches,
            Arc::new(FailingNavigator),
            Arc::new(ScriptedStepExecutor::new()),
        )
        .await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("parallel path query"));
    assert_eq!(
        coordinator.get_branch_status(branch_id).unwrap().state,
        BranchState::Failed
    );
    assert_eq!(bus.count_of(EventType::BranchFailed), 1);
}

#[tokio::test]
async fn panicking_branch_settles_without_starving_siblings() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let navigator = Arc::new(
        MockNavigator::new().with_parallel_paths("split-1", vec![vec![loc("pA")], vec![loc("pB")]]),
    );
    let executor = Arc::new(
        ScriptedStepExecutor::new()
            .panic_step("pA")
            .succeed_with("pB", json!({"ok": true})),
    );

    let branches = coordinator
        .create_branches_with_count(run.id, "split-1", 2)
        .await
        .unwrap();
    let panicking_id = branches[0].id;
    let results = coordinator
        .execute_branches(&run, branches, navigator, executor)
        .await;

    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("panicked"));
    assert!(results[1].success);
    assert_eq!(
        coordinator.get_branch_status(panicking_id).unwrap().state,
        BranchState::Failed
    );
    assert!(bus.count_of(EventType::BranchFailed) >= 1);
    assert_eq!(bus.count_of(EventType::BranchCompleted), 1);
}

#[tokio::test]
async fn cancel_branches_fails_running_branches_between_steps() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let navigator = Arc::new(MockNavigator::new().with_parallel_paths(
        "split-1",
        vec![vec![loc("a1"), loc("a2")], vec![loc("b1"), loc("b2")]],
    ));
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let executor = Arc::new(ScriptedStepExecutor::new().gated(gate.clone(), started_tx));

    let branches = coordinator
        .create_branches_with_count(run.id, "split-1", 2)
        .await
        .unwrap();

    let exec_coordinator = coordinator.clone();
    let exec_run = run.clone();
    let exec_navigator = navigator.clone();
    let exec_executor = executor.clone();
    let handle = tokio::spawn(async move {
        exec_coordinator
            .execute_branches(&exec_run, branches, exec_navigator, exec_executor)
            .await
    });

    // Both branches are mid-step once their first start signal arrives.
    started_rx.recv().await.unwrap();
    started_rx.recv().await.unwrap();

    let cancelled = coordinator.cancel_branches(run.id).await;
    assert_eq!(cancelled, 2);

    // Release the held steps; the loops observe cancellation before the
    // second step of each path.
    gate.add_permits(16);
    let results = handle.await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| !result.success));
    assert!(results
        .iter()
        .all(|result| result.error.as_deref() == Some("Cancelled")));

    let failed_events = bus.of_type(EventType::BranchFailed);
    assert_eq!(failed_events.len(), 2);

    let mut invocations = executor.invocations();
    invocations.sort();
    assert_eq!(invocations, vec!["a1", "b1"]);
}

#[tokio::test]
async fn cancel_has_no_effect_on_settled_branches() {
    let (coordinator, bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let branch = coordinator
        .create_sequential_branch(run.id, "only-step")
        .await
        .unwrap();
    let results = coordinator
        .execute_branches(
            &run,
            vec![branch.clone()],
            Arc::new(MockNavigator::new()),
            Arc::new(ScriptedStepExecutor::new()),
        )
        .await;
    assert!(results[0].success);

    let cancelled = coordinator.cancel_branches(run.id).await;

    assert_eq!(cancelled, 0);
    assert_eq!(bus.count_of(EventType::BranchFailed), 0);
    assert_eq!(
        coordinator.get_branch_status(branch.id).unwrap().state,
        BranchState::Completed
    );
}

#[tokio::test]
async fn stats_track_branch_and_step_outcomes() {
    let (coordinator, _bus) = coordinator();
    let run = test_run(RecoveryStrategy::Fail);

    let healthy = coordinator
        .create_sequential_branch(run.id, "ok-step")
        .await
        .unwrap();
    let results = coordinator
        .execute_branches(
            &run,
            vec![healthy],
            Arc::new(MockNavigator::new()),
            Arc::new(ScriptedStepExecutor::new()),
        )
        .await;
    assert!(results[0].success);

    let stats = coordinator.stats();
    assert_eq!(stats.branches_created, 1);
    assert_eq!(stats.branches_completed, 1);
    assert_eq!(stats.branches_failed, 0);
    assert_eq!(stats.steps_executed, 1);
}
