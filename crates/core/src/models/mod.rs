pub mod artifact;
pub mod message;
pub mod report;
pub mod result;
pub mod task;

pub use artifact::{ModelArtifact, ModelFormat};
pub use message::{ClientCommand, MasterResponse, WorkerCommand, WorkerReply};
pub use report::{RunReport, SimulationDataSet};
pub use result::{ComputationResult, ReplicaResult, Sample, Trajectory};
pub use task::{Batch, Task, TaskId};
