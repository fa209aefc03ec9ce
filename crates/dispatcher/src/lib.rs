//! Master端调度引擎
//!
//! [`MasterCoordinator`] 连接Worker并启动 [`Dispatcher`] 调度循环; 每个批次的
//! 结果经由 [`ResultHandler`] 处理, 失败时进入 [`RecoveryProtocol`]。

pub mod completion;
pub mod connector;
pub mod coordinator;
pub mod dispatcher;
pub mod protocol;
pub mod recovery;
pub mod result_handler;
pub mod sink;
pub mod task_source;
pub mod worker_pool;
pub mod worker_state;

pub use completion::{CompletionState, RunOutcome};
pub use connector::{TcpWorkerConnector, WorkerConnector};
pub use coordinator::{MasterCoordinator, RunHandle, RunSummary};
pub use dispatcher::Dispatcher;
pub use recovery::{RecoveryOutcome, RecoveryProtocol};
pub use result_handler::ResultHandler;
pub use sink::CollectingSink;
pub use task_source::TaskSource;
pub use worker_pool::{Worker, WorkerPool, WorkerSnapshot};
pub use worker_state::{WorkerState, WorkerStatus};
