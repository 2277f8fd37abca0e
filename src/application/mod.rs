//! Application layer: the run queue and the per-run state machine.

pub mod run_machine;
pub mod run_queue;

pub use run_machine::{PipelineDeps, RunStateMachine, SharedRun};
pub use run_queue::{QueueConfig, QueueStatus, RunQueue};
