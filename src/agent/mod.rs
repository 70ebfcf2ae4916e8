//! # Agent Module
//!
//! The reporting core of the tracker.
//!
//! This module handles:
//! - Asset identity and the shared agent state
//! - Day/night cadence from the local clock
//! - Deciding when a fix is worth the uplink cost
//! - Dispatching remote commands
//! - Running the decision loop and inbound handler side by side

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod runtime;
pub mod state;

pub use clock::{Cadence, Clock, SystemClock};
pub use dispatcher::{Command, CommandDispatcher, CommandRunner, ShellRunner};
pub use engine::{Decision, ReportEngine, Trigger};
pub use runtime::{Agent, AgentHandle};
pub use state::{AgentState, Identity, IdentityStore, SharedState};
