pub mod decision;
pub mod process;
pub mod server;
pub mod stats;
pub mod worker;

pub use decision::{KillDecision, TerminationOutcome, TerminationRecord, ThresholdConfig, Violation};
pub use process::{
    ClassifiedWorker, ProcessDescriptor, ProcessSnapshot, WorkerClass, NATIVE_GROUP,
};
pub use server::ServerRecord;
pub use stats::{GroupMember, WorkerGroup};
pub use worker::{ScoreboardState, WorkerRecord};
