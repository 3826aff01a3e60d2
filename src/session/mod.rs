//! Session state management
//!
//! One machine sequences every interaction cycle:
//! Idle -> SelectingMode -> Capturing -> Dispatching -> Playing -> Idle,
//! with Failed and Terminating as detours back to Idle.

mod machine;

pub use machine::{CycleOutcome, SessionDevices, SessionMachine, SessionStatus};
