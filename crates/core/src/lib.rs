pub mod codec;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use codec::CodecKind;
pub use config::*;
pub use errors::*;
pub use logging::{init_logging, LogContext};
pub use models::{
    Batch, ClientCommand, ComputationResult, MasterResponse, ModelArtifact, ModelFormat,
    ReplicaResult, RunReport, Sample, SimulationDataSet, Task, TaskId, Trajectory, WorkerCommand,
    WorkerReply,
};
pub use traits::{NullSink, ResultSink};
