//! The ingestion pipeline: cycles, source runs, deduplication and auditing.

pub mod gate;
pub mod orchestrator;
pub mod recorder;
pub mod runner;
pub mod scheduler;
pub mod summary;

pub use gate::{DeduplicationGate, DocumentStore, GateError, InsertOutcome, PersistOutcome};
pub use orchestrator::Orchestrator;
pub use recorder::{RunHandle, RunOutcome, RunRecorder};
pub use runner::{RunLimits, SourceRunner};
pub use scheduler::CycleScheduler;
pub use summary::{CycleSummary, RunSummary, Trigger};
