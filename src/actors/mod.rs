//! Actor-based scheduling
//!
//! The scheduler runs as an independent async task and is controlled through
//! a [`SchedulerHandle`].
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc command channel for control messages
//! 2. **Shutdown**: a watch channel, observed both between and during ticks
//! 3. **Request/Response**: oneshot channels for tick reports and status

pub mod messages;
pub mod scheduler;

pub use messages::{EngineStatus, PersistOutcome, SchedulerCommand, TickReport};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerSettings};
