//! # Event Types
//!
//! Lifecycle events carry a typed payload per event type rather than a
//! loose JSON bag, so payload shape mismatches fail at compile time while
//! the pub/sub envelope contract stays intact.

use crate::constants::events as event_names;
use crate::orchestration::types::BranchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Event types produced by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    BranchCreated,
    BranchCompleted,
    BranchFailed,
    StepStarted,
    StepCompleted,
    StepFailed,
    ContextUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BranchCreated => event_names::BRANCH_CREATED,
            Self::BranchCompleted => event_names::BRANCH_COMPLETED,
            Self::BranchFailed => event_names::BRANCH_FAILED,
            Self::StepStarted => event_names::STEP_STARTED,
            Self::StepCompleted => event_names::STEP_COMPLETED,
            Self::StepFailed => event_names::STEP_FAILED,
            Self::ContextUpdated => event_names::CONTEXT_UPDATED,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Originating component of a published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSource {
    pub component: String,
    pub instance_id: String,
}

/// Typed payloads, one variant per event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventData {
    BranchCreated {
        branch_id: Uuid,
        run_id: Uuid,
        parent_step_id: String,
        branch_index: Option<usize>,
        parallel: bool,
        total_branches: usize,
    },
    BranchCompleted {
        branch_id: Uuid,
        run_id: Uuid,
        result: BranchResult,
    },
    BranchFailed {
        branch_id: Uuid,
        run_id: Uuid,
        reason: String,
    },
    StepStarted {
        run_id: Uuid,
        branch_id: Uuid,
        step_id: String,
        step_name: String,
    },
    StepCompleted {
        run_id: Uuid,
        branch_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },
    StepFailed {
        run_id: Uuid,
        branch_id: Uuid,
        step_id: String,
        error: String,
    },
    ContextUpdated {
        run_id: Uuid,
        branch_id: Option<Uuid>,
        keys: Vec<String>,
    },
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::BranchCreated { .. } => EventType::BranchCreated,
            Self::BranchCompleted { .. } => EventType::BranchCompleted,
            Self::BranchFailed { .. } => EventType::BranchFailed,
            Self::StepStarted { .. } => EventType::StepStarted,
            Self::StepCompleted { .. } => EventType::StepCompleted,
            Self::StepFailed { .. } => EventType::StepFailed,
            Self::ContextUpdated { .. } => EventType::ContextUpdated,
        }
    }
}

/// Published event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub data: EventData,
}

impl Event {
    pub fn new(source: EventSource, data: EventData) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: data.event_type(),
            timestamp: Utc::now(),
            source,
            data,
        }
    }
}
