//! Location and step metadata value types.

use crate::constants::system;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One addressable point in a workflow graph.
///
/// Immutable value type: coordinator code builds new locations rather than
/// mutating existing ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Opaque identifier for this location instance
    pub id: String,
    /// Routine the owning run executes
    pub routine_id: String,
    /// Node within the routine graph
    pub node_id: String,
    /// Branch the location is scoped to, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<Uuid>,
}

impl Location {
    pub fn new(routine_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            routine_id: routine_id.into(),
            node_id: node_id.into(),
            branch_id: None,
        }
    }

    /// Location rooted at a graph node before the owning run is in hand.
    /// Creation-time Navigator queries are keyed by the run id.
    pub fn rooted_at(run_id: Uuid, node_id: impl Into<String>) -> Self {
        Self::new(run_id.to_string(), node_id)
    }

    /// Scope this location to a branch.
    pub fn for_branch(mut self, branch_id: Uuid) -> Self {
        self.branch_id = Some(branch_id);
        self
    }
}

/// Descriptive metadata about a step to execute.
///
/// Produced by the Navigator, or synthesized by the coordinator when the
/// graph carries no richer definition for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl StepInfo {
    /// Minimal metadata for a node with no richer definition.
    pub fn synthesized(node_id: &str) -> Self {
        Self {
            id: node_id.to_string(),
            name: node_id.to_string(),
            step_type: system::DEFAULT_STEP_TYPE.to_string(),
            description: None,
            inputs: None,
            outputs: None,
            config: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_branch_scoping() {
        let branch_id = Uuid::new_v4();
        let location = Location::new("routine-1", "node-a").for_branch(branch_id);
        assert_eq!(location.node_id, "node-a");
        assert_eq!(location.branch_id, Some(branch_id));
    }

    #[test]
    fn test_synthesized_step_info() {
        let info = StepInfo::synthesized("split-1");
        assert_eq!(info.id, "split-1");
        assert_eq!(info.name, "split-1");
        assert_eq!(info.step_type, system::DEFAULT_STEP_TYPE);
        assert!(info.description.is_none());
    }

    #[test]
    fn test_step_info_serde_type_rename() {
        let info = StepInfo::synthesized("n1");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], system::DEFAULT_STEP_TYPE);
    }
}
