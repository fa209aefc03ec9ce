//! Master端协调器: 启动调度循环, 提供 `join()` 等待点并负责有序关闭
//!
//! 只有两类错误会离开这里: 启动时没有任何Worker可用, 以及运行中所有
//! Worker都已失效而仍有任务未完成。

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use simfarm_core::{
    LogContext, MasterConfig, ModelArtifact, ResultSink, SimFarmError, SimFarmResult, Task,
};
use simfarm_infrastructure::{MetricsCollector, StructuredLogger};

use crate::completion::{CompletionState, RunOutcome};
use crate::connector::{TcpWorkerConnector, WorkerConnector};
use crate::dispatcher::Dispatcher;
use crate::protocol;
use crate::recovery::RecoveryProtocol;
use crate::result_handler::ResultHandler;
use crate::task_source::TaskSource;
use crate::worker_pool::{Worker, WorkerPool};
use crate::worker_state::WorkerState;

/// 一次成功运行的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub submitted: usize,
    pub completed: usize,
    pub removed_workers: Vec<SocketAddr>,
}

pub struct MasterCoordinator {
    config: MasterConfig,
    model: ModelArtifact,
    connector: Arc<dyn WorkerConnector>,
    sink: Arc<dyn ResultSink>,
    metrics: MetricsCollector,
    log: LogContext,
}

impl MasterCoordinator {
    pub fn new(
        config: MasterConfig,
        model: ModelArtifact,
        sink: Arc<dyn ResultSink>,
        log: LogContext,
    ) -> Self {
        let connector = Arc::new(TcpWorkerConnector::from_config(model.clone(), &config));
        Self {
            config,
            model,
            connector,
            sink,
            metrics: MetricsCollector::new(),
            log,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn WorkerConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// 连接所有配置的Worker并启动调度循环
    pub async fn start(self, tasks: Vec<Task>) -> SimFarmResult<RunHandle> {
        let span = self.log.span().clone();
        self.launch(tasks).instrument(span).await
    }

    async fn launch(self, tasks: Vec<Task>) -> SimFarmResult<RunHandle> {
        let endpoints = resolve_endpoints(&self.config.workers).await;
        let pool = Arc::new(WorkerPool::new());

        let attempts = endpoints.iter().map(|&endpoint| {
            let connector = self.connector.clone();
            async move { (endpoint, connector.connect(endpoint).await) }
        });
        for (endpoint, result) in join_all(attempts).await {
            match result {
                Ok(connection) => {
                    let state = WorkerState::new(endpoint, &self.config);
                    pool.register(Worker::new(state, connection)).await?;
                }
                Err(e) => warn!(worker = %endpoint, error = %e, "无法初始化Worker"),
            }
        }

        if pool.active_count() == 0 {
            return Err(SimFarmError::NoWorkersAvailable);
        }
        self.metrics.update_active_workers(pool.active_count());

        let submitted = tasks.len();
        let source = Arc::new(TaskSource::new(tasks));
        let completion = Arc::new(CompletionState::new(submitted));
        let recovery = RecoveryProtocol::new(
            self.connector.clone(),
            pool.clone(),
            self.config.probe_timeout(),
            self.metrics.clone(),
        );
        let handler = Arc::new(ResultHandler::new(
            pool.clone(),
            source.clone(),
            completion.clone(),
            self.sink.clone(),
            recovery,
            self.metrics.clone(),
        ));
        let dispatcher = Dispatcher::new(
            pool.clone(),
            source,
            completion.clone(),
            handler,
            self.metrics.clone(),
            self.log.clone(),
        );

        info!(
            tasks = submitted,
            workers = pool.active_count(),
            model = %self.model.name,
            "开始派发仿真任务"
        );
        let dispatcher = tokio::spawn(dispatcher.run().in_current_span());

        Ok(RunHandle {
            pool,
            completion,
            dispatcher,
            model_name: self.model.name.clone(),
            close_timeout: self.config.close_timeout(),
            submitted,
            log: self.log,
        })
    }
}

/// 解析 `host:port`, 无法解析的地址记录后跳过, 重复的端点只保留一个
async fn resolve_endpoints(workers: &[String]) -> Vec<SocketAddr> {
    let mut endpoints = BTreeSet::new();
    for worker in workers {
        match tokio::net::lookup_host(worker.as_str()).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => {
                    endpoints.insert(addr);
                }
                None => warn!(worker = %worker, "地址解析结果为空"),
            },
            Err(e) => warn!(worker = %worker, error = %e, "无法解析Worker地址"),
        }
    }
    endpoints.into_iter().collect()
}

/// 一次运行的句柄
pub struct RunHandle {
    pool: Arc<WorkerPool>,
    completion: Arc<CompletionState>,
    dispatcher: JoinHandle<RunOutcome>,
    model_name: String,
    close_timeout: Duration,
    submitted: usize,
    log: LogContext,
}

impl RunHandle {
    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    pub fn completion(&self) -> Arc<CompletionState> {
        self.completion.clone()
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// 等待运行结束, 然后关闭所有剩余Worker
    pub async fn join(self) -> SimFarmResult<RunSummary> {
        let span = self.log.span().clone();
        self.finish().instrument(span).await
    }

    async fn finish(mut self) -> SimFarmResult<RunSummary> {
        let outcome = self.completion.wait().await;
        if let Err(e) = (&mut self.dispatcher).await {
            warn!(error = %e, "调度任务未正常结束");
        }

        self.shutdown().await;

        let removed_workers = self.pool.removed_endpoints().await;
        let pending = self.completion.pending_tasks();
        let completed = self.submitted - pending;
        let abandoned = match outcome {
            RunOutcome::Completed => 0,
            _ => pending,
        };
        StructuredLogger::log_run_concluded(
            self.submitted,
            completed,
            abandoned,
            removed_workers.len(),
        );

        match outcome {
            RunOutcome::Completed => Ok(RunSummary {
                submitted: self.submitted,
                completed,
                removed_workers,
            }),
            RunOutcome::AllWorkersLost { pending_tasks } => {
                Err(SimFarmError::AllWorkersLost { pending_tasks })
            }
            RunOutcome::Aborted { reason } => Err(SimFarmError::Internal(reason)),
        }
    }

    /// 向所有剩余Worker发送 CLOSE_CONNECTION 并关闭socket
    ///
    /// 单个连接的关闭失败只影响该连接。
    async fn shutdown(&self) {
        self.pool.close();
        let workers = self.pool.drain_ready().await;
        debug!(workers = workers.len(), "关闭剩余Worker连接");

        let closing = workers
            .into_iter()
            .map(|worker| close_worker(worker, &self.model_name, self.close_timeout));
        join_all(closing).await;
    }
}

async fn close_worker(mut worker: Worker, model_name: &str, timeout: Duration) {
    let endpoint = worker.endpoint();
    if let Err(e) = protocol::close(&mut worker.connection, model_name, timeout).await {
        warn!(worker = %endpoint, error = %e, "CLOSE_CONNECTION 握手失败");
    }
    if let Err(e) = worker.connection.close().await {
        debug!(worker = %endpoint, error = %e, "关闭socket失败");
    }
}
