//! Shared test fixtures: scripted collaborators and a recording event bus.

#![allow(dead_code)]

use async_trait::async_trait;
use branch_coordinator::events::{Event, EventBus, EventType};
use branch_coordinator::models::{Location, RecoveryStrategy, Run, StepInfo};
use branch_coordinator::orchestration::{
    Navigator, RunStateStore, StepExecutionRequest, StepExecutionResult, StepExecutor,
};
use branch_coordinator::models::{BranchExecution, BranchUpdate};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Navigator scripted per node id.
#[derive(Default)]
pub struct MockNavigator {
    parallel_paths: HashMap<String, Vec<Vec<Location>>>,
}

impl MockNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel_paths(mut self, node_id: &str, paths: Vec<Vec<Location>>) -> Self {
        self.parallel_paths.insert(node_id.to_string(), paths);
        self
    }
}

#[async_trait]
impl Navigator for MockNavigator {
    async fn get_parallel_branches(
        &self,
        location: &Location,
    ) -> anyhow::Result<Vec<Vec<Location>>> {
        Ok(self
            .parallel_paths
            .get(&location.node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_step_info(&self, location: &Location) -> anyhow::Result<StepInfo> {
        Ok(StepInfo::synthesized(&location.node_id))
    }
}

/// Navigator whose path queries always fail.
pub struct FailingNavigator;

#[async_trait]
impl Navigator for FailingNavigator {
    async fn get_parallel_branches(
        &self,
        _location: &Location,
    ) -> anyhow::Result<Vec<Vec<Location>>> {
        Err(anyhow::anyhow!("graph service unavailable"))
    }

    async fn get_step_info(&self, _location: &Location) -> anyhow::Result<StepInfo> {
        Err(anyhow::anyhow!("graph service unavailable"))
    }
}

/// Outcome script for one step id.
#[derive(Clone)]
pub enum StepScript {
    Succeed(HashMap<String, Value>),
    Fail(String),
    Error(String),
    Panic,
}

/// Step executor driven by per-step scripts. Unscripted steps succeed with
/// no outputs. An optional gate semaphore lets tests hold steps mid-flight.
#[derive(Default)]
pub struct ScriptedStepExecutor {
    scripts: HashMap<String, StepScript>,
    invocations: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    started_tx: Option<UnboundedSender<String>>,
}

impl ScriptedStepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed_with(mut self, step_id: &str, outputs: Value) -> Self {
        let outputs = outputs
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        self.scripts
            .insert(step_id.to_string(), StepScript::Succeed(outputs));
        self
    }

    pub fn fail_step(mut self, step_id: &str, error: &str) -> Self {
        self.scripts
            .insert(step_id.to_string(), StepScript::Fail(error.to_string()));
        self
    }

    pub fn error_step(mut self, step_id: &str, error: &str) -> Self {
        self.scripts
            .insert(step_id.to_string(), StepScript::Error(error.to_string()));
        self
    }

    pub fn panic_step(mut self, step_id: &str) -> Self {
        self.scripts.insert(step_id.to_string(), StepScript::Panic);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>, started_tx: UnboundedSender<String>) -> Self {
        self.gate = Some(gate);
        self.started_tx = Some(started_tx);
        self
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedStepExecutor {
    async fn execute_step(
        &self,
        request: StepExecutionRequest,
    ) -> anyhow::Result<StepExecutionResult> {
        self.invocations.lock().push(request.step_id.clone());
        if let Some(started_tx) = &self.started_tx {
            let _ = started_tx.send(request.step_id.clone());
        }
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await?;
            permit.forget();
        }

        match self.scripts.get(&request.step_id) {
            None => Ok(StepExecutionResult::succeeded(HashMap::new(), 1)),
            Some(StepScript::Succeed(outputs)) => {
                Ok(StepExecutionResult::succeeded(outputs.clone(), 1))
            }
            Some(StepScript::Fail(error)) => Ok(StepExecutionResult::failed(error.clone(), 1)),
            Some(StepScript::Error(error)) => Err(anyhow::anyhow!("{error}")),
            Some(StepScript::Panic) => panic!("scripted panic in step {}", request.step_id),
        }
    }
}

/// Event bus that records every published event.
#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventBus {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn count_of(&self, event_type: EventType) -> usize {
        self.of_type(event_type).len()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: Event) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Store whose operations always fail.
pub struct FailingStateStore;

#[async_trait]
impl RunStateStore for FailingStateStore {
    async fn list_branches(&self, _run_id: Uuid) -> anyhow::Result<Vec<BranchExecution>> {
        Err(anyhow::anyhow!("storage offline"))
    }

    async fn create_branch(
        &self,
        _run_id: Uuid,
        _branch: &BranchExecution,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("storage offline"))
    }

    async fn update_branch(
        &self,
        _run_id: Uuid,
        _branch_id: Uuid,
        _update: &BranchUpdate,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("storage offline"))
    }
}

/// A run with the given recovery strategy and an otherwise default config.
pub fn test_run(strategy: RecoveryStrategy) -> Run {
    let mut run = Run::new("routine-under-test");
    run.config.recovery_strategy = strategy;
    run
}

/// Single-node location in the test routine.
pub fn loc(node_id: &str) -> Location {
    Location::new("routine-under-test", node_id)
}
