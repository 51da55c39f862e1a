//! # Event System
//!
//! Typed lifecycle events published by the coordinator, the [`EventBus`]
//! contract the host platform implements, and an in-process
//! [`BroadcastEventBus`] for embedded and test use.

pub mod publisher;
pub mod types;

pub use publisher::{BroadcastEventBus, EventBus};
pub use types::{Event, EventData, EventSource, EventType};
