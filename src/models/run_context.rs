//! # Run Context
//!
//! The mutable state bag passed between steps: run-level variables, a
//! free-form blackboard, and a chain of named scopes layering branch-local
//! state over run-level state.
//!
//! Isolation invariant: a context derived for a branch shares no mutable
//! state with the parent run's context. Concurrent branches must never
//! observe each other's writes.

use crate::constants::system;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A named variable namespace, chained from run-level to branch-level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub variables: HashMap<String, Value>,
    /// Name of the enclosing scope, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Scope {
    pub fn named(name: impl Into<String>, parent: Option<String>) -> Self {
        Self {
            name: name.into(),
            variables: HashMap::new(),
            parent,
        }
    }
}

/// Execution state shared by a run and its branches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Variables visible across the run
    pub variables: HashMap<String, Value>,
    /// Free-form shared memory
    pub blackboard: HashMap<String, Value>,
    /// Ordered scope chain, run-level first
    pub scopes: Vec<Scope>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive an isolated context for a branch.
    ///
    /// Variables are copied, the blackboard is structurally deep-cloned, and
    /// a fresh `branch-<id>` scope is appended whose parent is the run's last
    /// scope. The returned context is exclusively owned by the branch.
    pub fn clone_for_branch(&self, branch_id: Uuid) -> Self {
        let parent = self.scopes.last().map(|scope| scope.name.clone());
        let mut scopes = self.scopes.clone();
        scopes.push(Scope::named(
            format!("{}{branch_id}", system::BRANCH_SCOPE_PREFIX),
            parent,
        ));

        Self {
            variables: self.variables.clone(),
            blackboard: deep_clone_blackboard(&self.blackboard),
            scopes,
        }
    }

    /// Record a step output into the innermost scope and the run-level
    /// variables, keeping the value visible to later steps in the branch.
    pub fn record_output(&mut self, key: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.variables.insert(key.to_string(), value.clone());
        }
        self.variables.insert(key.to_string(), value);
    }

    /// The innermost scope, when any.
    pub fn current_scope(&self) -> Option<&Scope> {
        self.scopes.last()
    }
}

/// Structural deep clone of a blackboard.
///
/// Scoped to the known context shape (string keys, JSON values) so the
/// isolation guarantee stays auditable.
pub fn deep_clone_blackboard(blackboard: &HashMap<String, Value>) -> HashMap<String, Value> {
    blackboard
        .iter()
        .map(|(key, value)| (key.clone(), clone_value(value)))
        .collect()
}

fn clone_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(clone_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), clone_value(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}
