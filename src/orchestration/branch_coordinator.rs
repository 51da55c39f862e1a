//! # Branch Coordinator
//!
//! ## Architecture: Branch Execution Engine
//!
//! The BranchCoordinator turns a branching decision into one or more
//! persisted, trackable branch records and runs them to completion. It owns
//! the complete branch lifecycle:
//!
//! - **Branch creation**: materialize branches from a creation request
//!   (explicit count, predefined paths, or Navigator-derived parallel paths)
//! - **Execution**: run branches concurrently or in sequence, one isolated
//!   context per branch
//! - **Output collection**: merge step outputs without losing any step's
//!   contribution
//! - **Failure recovery**: apply the run's recovery strategy per branch
//! - **Result merging**: fold successful branch outputs back into a parent
//!   context
//! - **Cancellation and cleanup**: stop running branches, drop terminal
//!   records from memory
//! - **Restart recovery**: reload persisted branch state after a process
//!   restart
//!
//! ## Integration with Collaborators
//!
//! The coordinator delegates graph queries to the [`Navigator`], step logic
//! to the [`StepExecutor`], durability to the [`RunStateStore`], and
//! observability to the [`EventBus`]. Every collaborator call is an await
//! point; none of them may block sibling branches.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use branch_coordinator::events::BroadcastEventBus;
//! use branch_coordinator::orchestration::{BranchCoordinator, InMemoryRunStateStore};
//! use uuid::Uuid;
//!
//! # tokio_test::block_on(async {
//! let coordinator = BranchCoordinator::new(
//!     Arc::new(InMemoryRunStateStore::new()),
//!     Arc::new(BroadcastEventBus::default()),
//! );
//!
//! let run_id = Uuid::new_v4();
//! let branch = coordinator
//!     .create_sequential_branch(run_id, "step-1")
//!     .await
//!     .unwrap();
//! assert_eq!(branch.parent_step_id, "step-1");
//! # });
//! ```

use crate::config::CoordinatorConfig;
use crate::constants::system;
use crate::error::{CoordinatorError, Result};
use crate::events::{Event, EventBus, EventData, EventSource};
use crate::models::{
    deep_clone_blackboard, BranchExecution, BranchUpdate, Location, RecoveryStrategy, Run,
    RunContext, StepInfo, StepStatus,
};
use crate::orchestration::navigator::Navigator;
use crate::orchestration::state_store::RunStateStore;
use crate::orchestration::step_executor::StepExecutor;
use crate::orchestration::types::{
    BranchConfig, BranchResult, CoordinatorStats, StepExecutionRequest, StepExecutionResult,
};
use crate::state_machine::{BranchState, StepState};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Branch execution coordinator.
///
/// One instance serves a run engine process and may manage branches for
/// many runs at once. Cloning is cheap; clones share the branch table,
/// collaborators, and stats.
#[derive(Clone)]
pub struct BranchCoordinator {
    /// In-memory branch table, the only coordinator-side state shared
    /// across concurrently executing branches
    branches: Arc<DashMap<Uuid, BranchExecution>>,
    state_store: Arc<dyn RunStateStore>,
    event_bus: Arc<dyn EventBus>,
    config: CoordinatorConfig,
    /// Bounds concurrent branch executions
    execution_semaphore: Arc<Semaphore>,
    instance_id: String,
    stats: Arc<RwLock<CoordinatorStats>>,
}

impl BranchCoordinator {
    /// Create a coordinator with default configuration.
    pub fn new(state_store: Arc<dyn RunStateStore>, event_bus: Arc<dyn EventBus>) -> Self {
        Self::with_config(state_store, event_bus, CoordinatorConfig::default())
    }

    /// Create a coordinator with custom configuration.
    pub fn with_config(
        state_store: Arc<dyn RunStateStore>,
        event_bus: Arc<dyn EventBus>,
        config: CoordinatorConfig,
    ) -> Self {
        let execution_semaphore = Arc::new(Semaphore::new(config.max_concurrent_branches));

        Self {
            branches: Arc::new(DashMap::new()),
            state_store,
            event_bus,
            config,
            execution_semaphore,
            instance_id: Uuid::new_v4().to_string(),
            stats: Arc::new(RwLock::new(CoordinatorStats::default())),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Snapshot of lifetime counters for this instance.
    pub fn stats(&self) -> CoordinatorStats {
        *self.stats.read()
    }

    // ------------------------------------------------------------------
    // Branch creation
    // ------------------------------------------------------------------

    /// Create branch records for a branching decision.
    ///
    /// A sequential request always creates exactly one branch. A parallel
    /// request resolves its branch count from, in priority order: the
    /// predefined paths, the explicit count, or the Navigator's parallel
    /// path set rooted at the parent step. A Navigator that reports no
    /// paths degrades to a single branch; a parallel request with no count
    /// source at all is rejected as a configuration error.
    ///
    /// Each created branch is persisted best-effort and announced with a
    /// `BRANCH_CREATED` event.
    #[instrument(skip(self, config, navigator), fields(run_id = %run_id, parent_step_id = %config.parent_step_id))]
    pub async fn create_branches_from_config(
        &self,
        run_id: Uuid,
        config: &BranchConfig,
        navigator: Option<&dyn Navigator>,
    ) -> Result<Vec<BranchExecution>> {
        let predefined_paths = config
            .predefined_paths
            .as_ref()
            .filter(|paths| !paths.is_empty());

        let branch_count = if !config.parallel {
            1
        } else if let Some(paths) = predefined_paths {
            paths.len()
        } else if let Some(count) = config.branch_count {
            if count == 0 {
                return Err(CoordinatorError::ConfigurationError(format!(
                    "parallel branch request for step '{}' has a branch count of zero",
                    config.parent_step_id
                )));
            }
            count
        } else if let Some(navigator) = navigator {
            let parent_location = Location::rooted_at(run_id, config.parent_step_id.clone());
            let derived = navigator
                .get_parallel_branches(&parent_location)
                .await
                .map_err(|error| {
                    CoordinatorError::NavigationError(format!(
                        "parallel path query for step '{}' failed: {error}",
                        config.parent_step_id
                    ))
                })?;
            if derived.is_empty() {
                warn!(
                    run_id = %run_id,
                    parent_step_id = %config.parent_step_id,
                    "Navigator reported no parallel paths; creating a single branch"
                );
                1
            } else {
                derived.len()
            }
        } else {
            return Err(CoordinatorError::ConfigurationError(format!(
                "parallel branch request for step '{}' has no branch count, predefined paths, or navigator",
                config.parent_step_id
            )));
        };

        let mut created = Vec::with_capacity(branch_count);
        for index in 0..branch_count {
            let mut branch = BranchExecution::new(
                run_id,
                config.parent_step_id.clone(),
                config.parallel,
                config.parallel.then_some(index),
            );

            if let Some(paths) = predefined_paths {
                let path = &paths[index.min(paths.len() - 1)];
                branch.step_statuses = path
                    .iter()
                    .map(|location| StepStatus::pending(location.node_id.clone()))
                    .collect();
            }

            if let Err(error) = self.state_store.create_branch(run_id, &branch).await {
                warn!(
                    run_id = %run_id,
                    branch_id = %branch.id,
                    error = %error,
                    "Failed to persist branch creation; continuing"
                );
            }

            self.branches.insert(branch.id, branch.clone());
            self.publish_event(EventData::BranchCreated {
                branch_id: branch.id,
                run_id,
                parent_step_id: branch.parent_step_id.clone(),
                branch_index: branch.branch_index,
                parallel: branch.parallel,
                total_branches: branch_count,
            })
            .await;

            created.push(branch);
        }

        self.stats.write().branches_created += created.len() as u64;
        info!(
            run_id = %run_id,
            parent_step_id = %config.parent_step_id,
            branch_count = created.len(),
            parallel = config.parallel,
            "Created branches"
        );
        Ok(created)
    }

    /// Create parallel branches from the Navigator's path set.
    pub async fn create_parallel_branches(
        &self,
        run_id: Uuid,
        parent_step_id: impl Into<String>,
        navigator: &dyn Navigator,
    ) -> Result<Vec<BranchExecution>> {
        self.create_branches_from_config(
            run_id,
            &BranchConfig::parallel(parent_step_id),
            Some(navigator),
        )
        .await
    }

    /// Create the single branch used for sequential execution.
    pub async fn create_sequential_branch(
        &self,
        run_id: Uuid,
        parent_step_id: impl Into<String>,
    ) -> Result<BranchExecution> {
        let mut branches = self
            .create_branches_from_config(run_id, &BranchConfig::sequential(parent_step_id), None)
            .await?;
        branches.pop().ok_or_else(|| {
            CoordinatorError::ExecutionError("sequential creation produced no branch".to_string())
        })
    }

    /// Create one parallel branch per predefined path.
    pub async fn create_branches_with_paths(
        &self,
        run_id: Uuid,
        parent_step_id: impl Into<String>,
        paths: Vec<Vec<Location>>,
    ) -> Result<Vec<BranchExecution>> {
        self.create_branches_from_config(
            run_id,
            &BranchConfig::parallel(parent_step_id).with_predefined_paths(paths),
            None,
        )
        .await
    }

    /// Create an explicit number of parallel branches.
    pub async fn create_branches_with_count(
        &self,
        run_id: Uuid,
        parent_step_id: impl Into<String>,
        count: usize,
    ) -> Result<Vec<BranchExecution>> {
        self.create_branches_from_config(
            run_id,
            &BranchConfig::parallel(parent_step_id).with_branch_count(count),
            None,
        )
        .await
    }

    /// Re-populate the branch table from the Run State Store after a
    /// process restart. Restored branches keep their persisted state
    /// verbatim. Returns the number of branches restored.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn restore_branches(&self, run_id: Uuid) -> Result<usize> {
        let persisted = self
            .state_store
            .list_branches(run_id)
            .await
            .map_err(|error| CoordinatorError::PersistenceError(error.to_string()))?;

        let restored = persisted.len();
        for branch in persisted {
            self.branches.insert(branch.id, branch);
        }

        info!(run_id = %run_id, restored = restored, "Restored branches from run state store");
        Ok(restored)
    }

    /// Current record for a branch, when the table holds one.
    pub fn get_branch_status(&self, branch_id: Uuid) -> Option<BranchExecution> {
        self.branches.get(&branch_id).map(|entry| entry.clone())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a set of branches to completion and report one result per
    /// branch attempted.
    ///
    /// All branches in one call share the same mode by construction;
    /// dispatch follows the parallel flag of the first branch. Parallel
    /// branches run concurrently and are joined all-settle: a branch that
    /// panics becomes a synthetic failed result instead of poisoning its
    /// siblings. Sequential branches run in order; under the `fail`
    /// recovery strategy a failed branch halts the remainder, and unrun
    /// branches are absent from the result list.
    #[instrument(skip_all, fields(run_id = %run.id, branch_count = branches.len()))]
    pub async fn execute_branches(
        &self,
        run: &Run,
        branches: Vec<BranchExecution>,
        navigator: Arc<dyn Navigator>,
        step_executor: Arc<dyn StepExecutor>,
    ) -> Vec<BranchResult> {
        if branches.is_empty() {
            return Vec::new();
        }

        if branches[0].parallel {
            self.execute_parallel(run, branches, navigator, step_executor)
                .await
        } else {
            self.execute_sequential(run, branches, navigator, step_executor)
                .await
        }
    }

    async fn execute_parallel(
        &self,
        run: &Run,
        branches: Vec<BranchExecution>,
        navigator: Arc<dyn Navigator>,
        step_executor: Arc<dyn StepExecutor>,
    ) -> Vec<BranchResult> {
        debug!(
            run_id = %run.id,
            branch_count = branches.len(),
            "Starting parallel branch execution"
        );

        let mut handles = Vec::with_capacity(branches.len());
        for branch in branches {
            let branch_id = branch.id;
            let coordinator = self.clone();
            let run = run.clone();
            let navigator = Arc::clone(&navigator);
            let step_executor = Arc::clone(&step_executor);

            let handle = tokio::spawn(async move {
                let _permit = match coordinator
                    .execution_semaphore
                    .clone()
                    .acquire_owned()
                    .await
                {
                    Ok(permit) => permit,
                    Err(error) => {
                        error!(branch_id = %branch_id, error = %error, "Execution semaphore closed");
                        return BranchResult::failed(
                            branch_id,
                            format!("execution capacity unavailable: {error}"),
                        );
                    }
                };
                coordinator
                    .execute_single_branch(
                        &run,
                        branch,
                        navigator.as_ref(),
                        step_executor.as_ref(),
                    )
                    .await
            });
            handles.push((branch_id, handle));
        }

        // All-settle join in branch iteration order. Result order is what
        // merge determinism relies on, not completion order.
        let (branch_ids, join_handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let settled = futures::future::join_all(join_handles).await;

        let mut results = Vec::with_capacity(settled.len());
        for (branch_id, joined) in branch_ids.into_iter().zip(settled) {
            match joined {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    error!(
                        branch_id = %branch_id,
                        error = %join_error,
                        "Branch execution task panicked"
                    );
                    let reason = format!("branch execution panicked: {join_error}");
                    if let Some(mut entry) = self.branches.get_mut(&branch_id) {
                        entry.transition_to(BranchState::Failed);
                    }
                    self.persist_update(run.id, branch_id, BranchUpdate::state(BranchState::Failed))
                        .await;
                    self.publish_event(EventData::BranchFailed {
                        branch_id,
                        run_id: run.id,
                        reason: reason.clone(),
                    })
                    .await;
                    self.stats.write().branches_failed += 1;
                    results.push(BranchResult::failed(branch_id, reason));
                }
            }
        }
        results
    }

    async fn execute_sequential(
        &self,
        run: &Run,
        branches: Vec<BranchExecution>,
        navigator: Arc<dyn Navigator>,
        step_executor: Arc<dyn StepExecutor>,
    ) -> Vec<BranchResult> {
        debug!(
            run_id = %run.id,
            branch_count = branches.len(),
            "Starting sequential branch execution"
        );

        let mut results = Vec::with_capacity(branches.len());
        for branch in branches {
            let branch_id = branch.id;
            let result = self
                .execute_single_branch(run, branch, navigator.as_ref(), step_executor.as_ref())
                .await;
            let failed = !result.success;
            results.push(result);

            if failed && run.config.recovery_strategy == RecoveryStrategy::Fail {
                warn!(
                    run_id = %run.id,
                    branch_id = %branch_id,
                    "Sequential branch failed under fail recovery strategy; halting remaining branches"
                );
                break;
            }
        }
        results
    }

    /// Execute one branch to completion. Never returns an error and never
    /// panics past the task boundary: every internal failure is folded
    /// into a failed [`BranchResult`].
    #[instrument(skip_all, fields(run_id = %run.id, branch_id = %branch.id))]
    pub async fn execute_single_branch(
        &self,
        run: &Run,
        branch: BranchExecution,
        navigator: &dyn Navigator,
        step_executor: &dyn StepExecutor,
    ) -> BranchResult {
        let branch_id = branch.id;
        match self
            .run_branch_to_completion(run, branch, navigator, step_executor)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                error!(
                    run_id = %run.id,
                    branch_id = %branch_id,
                    error = %error,
                    "Branch execution failed outside the step loop"
                );
                if let Some(mut entry) = self.branches.get_mut(&branch_id) {
                    entry.transition_to(BranchState::Failed);
                }
                self.persist_update(run.id, branch_id, BranchUpdate::state(BranchState::Failed))
                    .await;
                self.publish_event(EventData::BranchFailed {
                    branch_id,
                    run_id: run.id,
                    reason: error.to_string(),
                })
                .await;
                self.stats.write().branches_failed += 1;
                BranchResult::failed(branch_id, error.to_string())
            }
        }
    }

    async fn run_branch_to_completion(
        &self,
        run: &Run,
        mut branch: BranchExecution,
        navigator: &dyn Navigator,
        step_executor: &dyn StepExecutor,
    ) -> Result<BranchResult> {
        branch.transition_to(BranchState::Running);
        self.branches.insert(branch.id, branch.clone());
        self.persist_update(run.id, branch.id, BranchUpdate::state(BranchState::Running))
            .await;

        // Phase 1: context derivation. The isolation boundary: from here on
        // this context is exclusively owned by the branch.
        let mut context = run.context.clone_for_branch(branch.id);

        // Phase 2: path determination.
        let path = self.determine_branch_path(run, &branch, navigator).await?;

        // Phase 3: step-by-step execution.
        let mut step_results: Vec<(String, StepExecutionResult)> = Vec::new();
        let mut completed_steps = 0usize;
        let mut failed_steps = 0usize;
        let mut cancelled = false;

        for location in &path {
            if self.branch_was_cancelled(branch.id) {
                info!(
                    run_id = %run.id,
                    branch_id = %branch.id,
                    "Branch cancelled; stopping before next step"
                );
                cancelled = true;
                break;
            }

            let step_id = location.node_id.clone();
            let step_info = match navigator.get_step_info(location).await {
                Ok(info) => info,
                Err(error) => {
                    warn!(
                        run_id = %run.id,
                        step_id = %step_id,
                        error = %error,
                        "Navigator returned no step metadata; synthesizing"
                    );
                    StepInfo::synthesized(&step_id)
                }
            };

            branch.status_mut(&step_id).mark_running();
            self.publish_event(EventData::StepStarted {
                run_id: run.id,
                branch_id: branch.id,
                step_id: step_id.clone(),
                step_name: step_info.name.clone(),
            })
            .await;

            let request = StepExecutionRequest {
                run_id: run.id,
                step_id: step_id.clone(),
                step_info,
                context: context.clone(),
                location: location.clone(),
            };
            let result = match step_executor.execute_step(request).await {
                Ok(result) => result,
                Err(error) => {
                    // An executor error is a failed step, not a failed
                    // phase; the loop keeps its continuation semantics.
                    StepExecutionResult::failed(error.to_string(), 0)
                }
            };
            self.stats.write().steps_executed += 1;

            let mut halt = false;
            if result.success {
                completed_steps += 1;
                let outputs = result.outputs.clone().unwrap_or_default();
                let result_value = Value::Object(
                    outputs
                        .iter()
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect(),
                );
                branch.status_mut(&step_id).mark_completed(Some(result_value));

                if !outputs.is_empty() {
                    let mut keys: Vec<String> = outputs.keys().cloned().collect();
                    keys.sort();
                    for (key, value) in &outputs {
                        context.record_output(key, value.clone());
                    }
                    self.publish_event(EventData::ContextUpdated {
                        run_id: run.id,
                        branch_id: Some(branch.id),
                        keys,
                    })
                    .await;
                }

                self.publish_event(EventData::StepCompleted {
                    run_id: run.id,
                    branch_id: branch.id,
                    step_id: step_id.clone(),
                    duration_ms: result.duration_ms,
                })
                .await;
            } else {
                failed_steps += 1;
                let error_message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "step failed without error detail".to_string());
                branch.status_mut(&step_id).mark_failed(&error_message);
                self.publish_event(EventData::StepFailed {
                    run_id: run.id,
                    branch_id: branch.id,
                    step_id: step_id.clone(),
                    error: error_message,
                })
                .await;

                if run.config.recovery_strategy == RecoveryStrategy::Fail {
                    debug!(
                        run_id = %run.id,
                        branch_id = %branch.id,
                        step_id = %step_id,
                        "Step failed under fail recovery strategy; halting branch"
                    );
                    halt = true;
                }
            }

            step_results.push((step_id, result));
            if halt {
                break;
            }
        }

        // Steps scheduled but never attempted. Seeded status records flip
        // to skipped; lazily tracked branches record nothing for them.
        let attempted = step_results.len();
        let skipped_steps = path.len().saturating_sub(attempted);
        for location in path.iter().skip(attempted) {
            if let Some(status) = branch
                .step_statuses
                .iter_mut()
                .find(|status| status.step_id == location.node_id)
            {
                if status.state == StepState::Pending {
                    status.mark_skipped();
                }
            }
        }

        // Phase 4: output collection.
        let outputs = collect_step_outputs(&step_results);

        if cancelled {
            // cancel_branches already transitioned the table entry and
            // published the failure event; only sync statuses and persist.
            if let Some(mut entry) = self.branches.get_mut(&branch.id) {
                entry.step_statuses = branch.step_statuses.clone();
            }
            self.persist_update(
                run.id,
                branch.id,
                BranchUpdate::state(BranchState::Failed)
                    .with_step_statuses(branch.step_statuses.clone()),
            )
            .await;
            return Ok(BranchResult {
                branch_id: branch.id,
                success: false,
                completed_steps,
                failed_steps,
                skipped_steps,
                outputs,
                error: Some(system::CANCELLED_REASON.to_string()),
            });
        }

        // Phase 5: failure handling per recovery strategy.
        let (success, error) = if failed_steps > 0 {
            match run.config.recovery_strategy {
                RecoveryStrategy::Skip => (true, None),
                RecoveryStrategy::Retry => {
                    warn!(
                        run_id = %run.id,
                        branch_id = %branch.id,
                        "Retry recovery strategy is not implemented; continuing as skip"
                    );
                    (true, None)
                }
                RecoveryStrategy::Fail => (
                    false,
                    Some(format!(
                        "{failed_steps} of {} steps failed",
                        path.len()
                    )),
                ),
            }
        } else {
            (true, None)
        };

        let result = BranchResult {
            branch_id: branch.id,
            success,
            completed_steps,
            failed_steps,
            skipped_steps,
            outputs,
            error: error.clone(),
        };

        let final_state = if success {
            BranchState::Completed
        } else {
            BranchState::Failed
        };
        branch.transition_to(final_state);
        self.branches.insert(branch.id, branch.clone());
        self.persist_update(
            run.id,
            branch.id,
            BranchUpdate::state(final_state).with_step_statuses(branch.step_statuses.clone()),
        )
        .await;

        if success {
            self.publish_event(EventData::BranchCompleted {
                branch_id: branch.id,
                run_id: run.id,
                result: result.clone(),
            })
            .await;
            self.stats.write().branches_completed += 1;
        } else {
            self.publish_event(EventData::BranchFailed {
                branch_id: branch.id,
                run_id: run.id,
                reason: error.unwrap_or_else(|| "branch failed".to_string()),
            })
            .await;
            self.stats.write().branches_failed += 1;
        }

        info!(
            run_id = %run.id,
            branch_id = %result.branch_id,
            success = result.success,
            completed_steps = result.completed_steps,
            failed_steps = result.failed_steps,
            skipped_steps = result.skipped_steps,
            "Branch execution finished"
        );
        Ok(result)
    }

    /// Resolve the ordered location path a branch will walk.
    async fn determine_branch_path(
        &self,
        run: &Run,
        branch: &BranchExecution,
        navigator: &dyn Navigator,
    ) -> Result<Vec<Location>> {
        // Recorded statuses define the path directly (predefined paths and
        // resumed runs).
        if !branch.step_statuses.is_empty() {
            return Ok(branch
                .step_statuses
                .iter()
                .map(|status| {
                    Location::new(run.routine_id.clone(), status.step_id.clone())
                        .for_branch(branch.id)
                })
                .collect());
        }

        let parent_location =
            Location::new(run.routine_id.clone(), branch.parent_step_id.clone())
                .for_branch(branch.id);

        if !branch.parallel {
            return Ok(vec![parent_location]);
        }

        let paths = navigator
            .get_parallel_branches(&parent_location)
            .await
            .map_err(|error| {
                CoordinatorError::NavigationError(format!(
                    "parallel path query for step '{}' failed: {error}",
                    branch.parent_step_id
                ))
            })?;

        if paths.is_empty() {
            warn!(
                run_id = %run.id,
                branch_id = %branch.id,
                parent_step_id = %branch.parent_step_id,
                "Navigator reported no parallel paths; using the parent location as a single-step path"
            );
            return Ok(vec![parent_location]);
        }

        let index = branch.branch_index.unwrap_or(0);
        let selected = if index >= paths.len() {
            // The graph may have changed between creation and execution.
            // Index drift degrades to the last available path.
            warn!(
                run_id = %run.id,
                branch_id = %branch.id,
                branch_index = index,
                available_paths = paths.len(),
                "Branch index out of range against current parallel paths; clamping to last"
            );
            paths.len() - 1
        } else {
            index
        };

        Ok(paths[selected]
            .iter()
            .map(|location| location.clone().for_branch(branch.id))
            .collect())
    }

    /// True when another caller flipped this branch to failed while it was
    /// executing. Checked between steps.
    fn branch_was_cancelled(&self, branch_id: Uuid) -> bool {
        self.branches
            .get(&branch_id)
            .map(|entry| entry.state == BranchState::Failed)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Result merging
    // ------------------------------------------------------------------

    /// Fold successful branch outputs into a new context derived from the
    /// parent. The parent is never mutated.
    ///
    /// A key produced by exactly one branch is written directly into
    /// `variables`; a key produced by two or more branches is written under
    /// `<key>_merged` as an array ordered by branch iteration order, not
    /// completion order. Failed branches contribute nothing.
    pub fn merge_branch_results(
        &self,
        parent_context: &RunContext,
        results: &[BranchResult],
    ) -> RunContext {
        let mut merged = RunContext {
            variables: parent_context.variables.clone(),
            blackboard: deep_clone_blackboard(&parent_context.blackboard),
            scopes: parent_context.scopes.clone(),
        };

        let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
        for result in results.iter().filter(|result| result.success) {
            let mut keys: Vec<&String> = result.outputs.keys().collect();
            keys.sort();
            for key in keys {
                let value = result.outputs[key].clone();
                match grouped.iter_mut().find(|(existing, _)| existing == key) {
                    Some((_, values)) => values.push(value),
                    None => grouped.push((key.clone(), vec![value])),
                }
            }
        }

        for (key, mut values) in grouped {
            if values.len() == 1 {
                merged.variables.insert(key, values.remove(0));
            } else {
                merged.variables.insert(
                    format!("{key}{}", system::MERGED_KEY_SUFFIX),
                    Value::Array(values),
                );
            }
        }

        merged
    }

    // ------------------------------------------------------------------
    // Cancellation & cleanup
    // ------------------------------------------------------------------

    /// Cancel every running branch of a run. Cancellation is modeled as a
    /// terminal failure; completed and failed branches are untouched.
    /// Returns the number of branches cancelled.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn cancel_branches(&self, run_id: Uuid) -> usize {
        let running: Vec<Uuid> = self
            .branches
            .iter()
            .filter(|entry| entry.run_id == run_id && entry.state == BranchState::Running)
            .map(|entry| entry.id)
            .collect();

        for branch_id in &running {
            if let Some(mut entry) = self.branches.get_mut(branch_id) {
                entry.transition_to(BranchState::Failed);
            }
            self.persist_update(run_id, *branch_id, BranchUpdate::state(BranchState::Failed))
                .await;
            self.publish_event(EventData::BranchFailed {
                branch_id: *branch_id,
                run_id,
                reason: system::CANCELLED_REASON.to_string(),
            })
            .await;
        }

        if !running.is_empty() {
            self.stats.write().branches_cancelled += running.len() as u64;
            info!(run_id = %run_id, cancelled = running.len(), "Cancelled running branches");
        }
        running.len()
    }

    /// Drop terminal branches of a run from the in-memory table. Persistent
    /// storage is untouched. Returns the number of branches removed.
    pub fn cleanup(&self, run_id: Uuid) -> usize {
        let terminal: Vec<Uuid> = self
            .branches
            .iter()
            .filter(|entry| entry.run_id == run_id && entry.state.is_terminal())
            .map(|entry| entry.id)
            .collect();

        for branch_id in &terminal {
            self.branches.remove(branch_id);
        }

        debug!(run_id = %run_id, removed = terminal.len(), "Cleaned up terminal branches");
        terminal.len()
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    async fn publish_event(&self, data: EventData) {
        let event = Event::new(
            EventSource {
                component: system::COMPONENT_NAME.to_string(),
                instance_id: self.instance_id.clone(),
            },
            data,
        );
        if let Err(error) = self.event_bus.publish(event).await {
            warn!(error = %error, "Failed to publish coordinator event");
        }
    }

    async fn persist_update(&self, run_id: Uuid, branch_id: Uuid, update: BranchUpdate) {
        if let Err(error) = self
            .state_store
            .update_branch(run_id, branch_id, &update)
            .await
        {
            warn!(
                run_id = %run_id,
                branch_id = %branch_id,
                error = %error,
                "Failed to persist branch update; continuing"
            );
        }
    }
}

/// Merge outputs across a branch's step results. A key produced by more
/// than one step is preserved as an array in step order.
fn collect_step_outputs(
    step_results: &[(String, StepExecutionResult)],
) -> HashMap<String, Value> {
    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for (_, result) in step_results.iter().filter(|(_, result)| result.success) {
        let Some(outputs) = &result.outputs else {
            continue;
        };
        let mut keys: Vec<&String> = outputs.keys().collect();
        keys.sort();
        for key in keys {
            let value = outputs[key].clone();
            match grouped.iter_mut().find(|(existing, _)| existing == key) {
                Some((_, values)) => values.push(value),
                None => grouped.push((key.clone(), vec![value])),
            }
        }
    }

    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            (key, value)
        })
        .collect()
}
