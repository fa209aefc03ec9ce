//! 超时恢复协议
//!
//! ACTIVE → (派发失败) → PROBING → { ACTIVE (新连接, 窗口减半) | REMOVED }
//!
//! 探测使用一条全新的连接和固定的短超时, 与每任务超时无关。用来区分
//! "慢"(可以恢复, 进一步节流) 和 "死"(移除)。只有传输层故障会被探测,
//! 协议违规直接移除。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use simfarm_core::{SimFarmError, SimFarmResult};
use simfarm_infrastructure::{Connection, MetricsCollector, StructuredLogger};

use crate::connector::WorkerConnector;
use crate::protocol;
use crate::worker_pool::{Worker, WorkerPool};
use crate::worker_state::WorkerState;

/// 一次恢复的结果
#[derive(Debug)]
pub enum RecoveryOutcome {
    /// Worker只是慢: 新连接, 窗口已减半
    Recovered(Worker),
    /// Worker已失效, 状态为 REMOVED
    Removed(WorkerState),
}

pub struct RecoveryProtocol {
    connector: Arc<dyn WorkerConnector>,
    pool: Arc<WorkerPool>,
    probe_timeout: Duration,
    metrics: MetricsCollector,
}

impl RecoveryProtocol {
    pub fn new(
        connector: Arc<dyn WorkerConnector>,
        pool: Arc<WorkerPool>,
        probe_timeout: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            connector,
            pool,
            probe_timeout,
            metrics,
        }
    }

    /// 探测一个派发失败的Worker
    ///
    /// 旧连接已经由调用方丢弃, 这里不会再使用它。
    pub async fn recover(&self, mut state: WorkerState) -> RecoveryOutcome {
        let endpoint = state.endpoint();
        state.mark_timed_out();

        if let Err(e) = state.begin_probe() {
            warn!(worker = %endpoint, error = %e, "无法进入探测状态");
            return self.discard(state, &e.to_string());
        }
        self.pool.update(&state).await;
        StructuredLogger::log_worker_probing(endpoint, state.recoveries());

        match self.probe(endpoint).await {
            Ok(connection) => match state.probe_succeeded() {
                Ok(()) => {
                    StructuredLogger::log_worker_recovered(endpoint, state.window());
                    self.metrics.record_worker_recovered();
                    RecoveryOutcome::Recovered(Worker::new(state, connection))
                }
                Err(e) => self.discard(state, &e.to_string()),
            },
            Err(e) => {
                debug!(worker = %endpoint, error = %e, "探测失败");
                self.discard(state, &e.to_string())
            }
        }
    }

    /// 新连接 → INIT → PING → PONG, 全程受探测超时约束
    async fn probe(&self, endpoint: SocketAddr) -> SimFarmResult<Connection> {
        let attempt = async {
            let mut connection = self.connector.connect(endpoint).await?;
            protocol::ping(&mut connection, self.probe_timeout).await?;
            Ok::<_, SimFarmError>(connection)
        };

        match tokio::time::timeout(self.probe_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SimFarmError::timeout(
                format!("探测 {endpoint}"),
                self.probe_timeout,
            )),
        }
    }

    /// 不经探测直接移除, 用于协议违规等无法通过重连恢复的失败
    pub fn discard(&self, mut state: WorkerState, reason: &str) -> RecoveryOutcome {
        state.mark_removed();
        StructuredLogger::log_worker_removed(state.endpoint(), reason);
        self.metrics.record_worker_removed();
        RecoveryOutcome::Removed(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_state::WorkerStatus;
    use async_trait::async_trait;
    use simfarm_core::{MasterConfig, WorkerCommand, WorkerReply};
    use simfarm_infrastructure::ConnectionOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Clone, Copy)]
    enum Peer {
        Answers,
        Silent,
        Refuses,
    }

    /// 每次连接都在本地建立一对socket, 对端按 `Peer` 应答
    struct LoopbackConnector {
        peer: Peer,
        calls: AtomicUsize,
    }

    impl LoopbackConnector {
        fn new(peer: Peer) -> Arc<Self> {
            Arc::new(Self {
                peer,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkerConnector for LoopbackConnector {
        async fn connect(&self, endpoint: SocketAddr) -> SimFarmResult<Connection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Peer::Refuses = self.peer {
                return Err(SimFarmError::ConnectionClosed);
            }

            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let stream = TcpStream::connect(listener.local_addr()?).await?;
            let (accepted, peer_addr) = listener.accept().await?;

            let answers = matches!(self.peer, Peer::Answers);
            tokio::spawn(async move {
                let options = ConnectionOptions::default();
                let mut server = Connection::from_stream(accepted, peer_addr, &options);
                while let Ok(command) = server.recv::<WorkerCommand>().await {
                    if answers && matches!(command, WorkerCommand::Ping) {
                        if server.send(&WorkerReply::Pong).await.is_err() {
                            break;
                        }
                    }
                }
            });

            Ok(Connection::from_stream(
                stream,
                endpoint,
                &ConnectionOptions::default(),
            ))
        }
    }

    fn endpoint() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    fn recovery(connector: Arc<LoopbackConnector>, pool: Arc<WorkerPool>) -> RecoveryProtocol {
        RecoveryProtocol::new(
            connector,
            pool,
            Duration::from_millis(200),
            MetricsCollector::new(),
        )
    }

    #[tokio::test]
    async fn test_answering_worker_recovers_with_halved_window() {
        let connector = LoopbackConnector::new(Peer::Answers);
        let pool = Arc::new(WorkerPool::new());
        let state = WorkerState::new(endpoint(), &MasterConfig::default());
        assert_eq!(state.window(), 10);

        match recovery(connector.clone(), pool.clone()).recover(state).await {
            RecoveryOutcome::Recovered(worker) => {
                assert_eq!(worker.state.status(), WorkerStatus::Active);
                assert_eq!(worker.state.window(), 5);
                assert_eq!(worker.state.recoveries(), 1);
                assert_eq!(worker.state.timeouts(), 1);
                assert_eq!(worker.endpoint(), endpoint());
            }
            other => panic!("期望 Recovered, 实际 {other:?}"),
        }
        assert_eq!(connector.calls(), 1);

        let snapshot = pool.snapshot(endpoint()).await.unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Probing);
    }

    #[tokio::test]
    async fn test_refused_connection_removes_worker() {
        let connector = LoopbackConnector::new(Peer::Refuses);
        let pool = Arc::new(WorkerPool::new());
        let state = WorkerState::new(endpoint(), &MasterConfig::default());

        match recovery(connector.clone(), pool).recover(state).await {
            RecoveryOutcome::Removed(state) => {
                assert_eq!(state.status(), WorkerStatus::Removed);
                assert_eq!(state.recoveries(), 0);
            }
            other => panic!("期望 Removed, 实际 {other:?}"),
        }
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn test_silent_worker_is_removed_after_timeout() {
        let connector = LoopbackConnector::new(Peer::Silent);
        let pool = Arc::new(WorkerPool::new());
        let state = WorkerState::new(endpoint(), &MasterConfig::default());

        let started = tokio::time::Instant::now();
        let outcome = recovery(connector, pool).recover(state).await;
        let elapsed = started.elapsed();

        assert!(matches!(outcome, RecoveryOutcome::Removed(_)));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_discard_never_reconnects() {
        let connector = LoopbackConnector::new(Peer::Answers);
        let pool = Arc::new(WorkerPool::new());
        let state = WorkerState::new(endpoint(), &MasterConfig::default());

        match recovery(connector.clone(), pool).discard(state, "协议错误") {
            RecoveryOutcome::Removed(state) => assert_eq!(state.status(), WorkerStatus::Removed),
            other => panic!("期望 Removed, 实际 {other:?}"),
        }
        assert_eq!(connector.calls(), 0);
    }
}
