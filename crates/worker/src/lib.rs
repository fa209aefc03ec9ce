//! 仿真Worker: 接收Master派发的批次并执行副本

pub mod model_registry;
pub mod models;
pub mod server;
pub mod session;

pub use model_registry::{ModelFactory, ModelRegistry, SimulationModel};
pub use models::{RandomWalk, RandomWalkFactory, RANDOM_WALK};
pub use server::WorkerServer;
pub use session::WorkerSession;
