//! 处理一次派发的结果
//!
//! 成功: Worker回到就绪队列, 结果交给外部的 [`ResultSink`], 本地不留副本。
//! 失败: 传输层故障进入恢复流程, 按结果把Worker放回或移除; 协议违规
//! (包括Worker的ERROR应答) 直接移除该Worker。然后把批次中的所有任务
//! 放回积压队列的队首。两条路径最后都递减 `running_workers` 并唤醒调度循环。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use simfarm_core::{Batch, ComputationResult, ResultSink, SimFarmError};
use simfarm_infrastructure::{MetricsCollector, StructuredLogger};

use crate::completion::CompletionState;
use crate::recovery::{RecoveryOutcome, RecoveryProtocol};
use crate::task_source::TaskSource;
use crate::worker_pool::{Worker, WorkerPool};

pub struct ResultHandler {
    pool: Arc<WorkerPool>,
    source: Arc<TaskSource>,
    completion: Arc<CompletionState>,
    sink: Arc<dyn ResultSink>,
    recovery: RecoveryProtocol,
    metrics: MetricsCollector,
}

impl ResultHandler {
    pub fn new(
        pool: Arc<WorkerPool>,
        source: Arc<TaskSource>,
        completion: Arc<CompletionState>,
        sink: Arc<dyn ResultSink>,
        recovery: RecoveryProtocol,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            pool,
            source,
            completion,
            sink,
            recovery,
            metrics,
        }
    }

    pub async fn on_success(
        &self,
        mut worker: Worker,
        batch: Batch,
        result: ComputationResult,
        round_trip: Duration,
    ) {
        let endpoint = worker.endpoint();
        let completed = batch.len();

        worker.state.record_round_trip(completed, round_trip);
        StructuredLogger::log_batch_completed(
            endpoint,
            completed,
            round_trip,
            worker.state.timeout_for(worker.state.window()),
        );
        self.metrics.record_batch_completed(completed, round_trip);

        if let Err(e) = self.pool.release(worker).await {
            error!(worker = %endpoint, error = %e, "无法将Worker放回就绪队列");
        }

        self.sink.accept(result.results);
        self.source.complete(completed);
        self.completion.tasks_completed(completed);
        self.metrics.update_pending_tasks(self.completion.pending_tasks());
        self.completion.batch_finished();
    }

    pub async fn on_failure(&self, worker: Worker, batch: Batch, cause: SimFarmError) {
        let Worker { state, connection } = worker;
        let endpoint = state.endpoint();
        StructuredLogger::log_batch_failed(endpoint, batch.len(), &cause.to_string());

        // 失败的连接不再复用
        drop(connection);

        let outcome = if cause.is_transport() {
            self.recovery.recover(state).await
        } else {
            warn!(worker = %endpoint, error = %cause, "Worker违反协议, 不再探测");
            self.recovery.discard(state, &cause.to_string())
        };

        match outcome {
            RecoveryOutcome::Recovered(worker) => {
                if let Err(e) = self.pool.release(worker).await {
                    error!(worker = %endpoint, error = %e, "无法将恢复的Worker放回就绪队列");
                }
            }
            RecoveryOutcome::Removed(state) => {
                self.pool.remove(&state).await;
                self.metrics.update_active_workers(self.pool.active_count());
            }
        }

        let requeued = batch.len();
        self.source.requeue(batch.into_tasks()).await;
        self.metrics.record_tasks_requeued(requeued);
        debug!(worker = %endpoint, requeued = requeued, "失败批次的任务已放回队首");

        self.completion.batch_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::WorkerConnector;
    use crate::worker_state::{WorkerState, WorkerStatus};
    use async_trait::async_trait;
    use mockall::mock;
    use simfarm_core::{MasterConfig, ReplicaResult, SimFarmResult, Task, TaskId, Trajectory};
    use simfarm_infrastructure::{Connection, ConnectionOptions};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::{TcpListener, TcpStream};

    mock! {
        pub Sink {}
        impl ResultSink for Sink {
            fn accept(&self, results: Vec<ReplicaResult>);
        }
    }

    #[derive(Default)]
    struct RefusingConnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkerConnector for RefusingConnector {
        async fn connect(&self, _endpoint: SocketAddr) -> SimFarmResult<Connection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SimFarmError::ConnectionClosed)
        }
    }

    async fn registered_worker(pool: &WorkerPool, listener: &TcpListener) -> Worker {
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let _ = listener.accept().await.unwrap();
        let connection = Connection::from_stream(stream, addr, &ConnectionOptions::default());
        let state = WorkerState::new(addr, &MasterConfig::default());
        pool.register(Worker::new(state, connection)).await.unwrap();
        pool.acquire().await.unwrap()
    }

    fn handler(
        pool: Arc<WorkerPool>,
        source: Arc<TaskSource>,
        completion: Arc<CompletionState>,
        sink: MockSink,
        connector: Arc<RefusingConnector>,
    ) -> ResultHandler {
        let metrics = MetricsCollector::new();
        let recovery = RecoveryProtocol::new(
            connector,
            pool.clone(),
            Duration::from_millis(100),
            metrics.clone(),
        );
        ResultHandler::new(pool, source, completion, Arc::new(sink), recovery, metrics)
    }

    fn tasks(n: u64) -> Vec<Task> {
        (0..n).map(|i| Task::new(TaskId(i), i as u32, i)).collect()
    }

    #[tokio::test]
    async fn test_success_releases_worker_and_forwards_results() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool = Arc::new(WorkerPool::new());
        let source = Arc::new(TaskSource::new(tasks(3)));
        let completion = Arc::new(CompletionState::new(3));

        let mut sink = MockSink::new();
        sink.expect_accept()
            .withf(|results| results.len() == 3)
            .times(1)
            .return_const(());

        let connector = Arc::new(RefusingConnector::default());
        let handler = handler(
            pool.clone(),
            source.clone(),
            completion.clone(),
            sink,
            connector.clone(),
        );
        let worker = registered_worker(&pool, &listener).await;

        let batch = Batch::new(source.take_up_to(3).await);
        let result = ComputationResult::new(
            batch
                .task_ids()
                .into_iter()
                .map(|task_id| ReplicaResult {
                    task_id,
                    trajectory: Trajectory::default(),
                })
                .collect(),
        );
        completion.batch_started();

        handler
            .on_success(worker, batch, result, Duration::from_millis(30))
            .await;

        assert_eq!(completion.running_workers(), 0);
        assert_eq!(completion.pending_tasks(), 0);
        assert_eq!(source.in_flight(), 0);

        let back = pool.acquire().await.unwrap();
        assert_eq!(back.state.last_round_trip(), Some(Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn test_failure_with_dead_worker_requeues_and_removes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool = Arc::new(WorkerPool::new());
        let source = Arc::new(TaskSource::new(tasks(4)));
        let completion = Arc::new(CompletionState::new(4));

        let mut sink = MockSink::new();
        sink.expect_accept().never();

        let connector = Arc::new(RefusingConnector::default());
        let handler = handler(
            pool.clone(),
            source.clone(),
            completion.clone(),
            sink,
            connector.clone(),
        );
        let worker = registered_worker(&pool, &listener).await;
        let endpoint = worker.endpoint();

        let batch = Batch::new(source.take_up_to(2).await);
        completion.batch_started();

        handler
            .on_failure(worker, batch, SimFarmError::ConnectionClosed)
            .await;

        assert_eq!(completion.running_workers(), 0);
        assert_eq!(completion.pending_tasks(), 4);
        assert_eq!(source.in_flight(), 0);
        assert_eq!(source.backlog_len().await, 4);

        let requeued = source.take_up_to(4).await;
        let ids: Vec<u64> = requeued.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        assert_eq!(pool.active_count(), 0);
        let snapshot = pool.snapshot(endpoint).await.unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Removed);
        assert!(pool.drain_ready().await.is_empty());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_protocol_violation_removes_without_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool = Arc::new(WorkerPool::new());
        let source = Arc::new(TaskSource::new(tasks(3)));
        let completion = Arc::new(CompletionState::new(3));

        let mut sink = MockSink::new();
        sink.expect_accept().never();

        let connector = Arc::new(RefusingConnector::default());
        let handler = handler(
            pool.clone(),
            source.clone(),
            completion.clone(),
            sink,
            connector.clone(),
        );
        let worker = registered_worker(&pool, &listener).await;
        let endpoint = worker.endpoint();

        let batch = Batch::new(source.take_up_to(3).await);
        completion.batch_started();

        let cause = SimFarmError::protocol("RESULTS", "ERROR(replica 0: invalid deadline)");
        handler.on_failure(worker, batch, cause).await;

        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(completion.running_workers(), 0);
        assert_eq!(source.backlog_len().await, 3);

        let snapshot = pool.snapshot(endpoint).await.unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Removed);
        assert_eq!(snapshot.recoveries, 0);
    }
}
