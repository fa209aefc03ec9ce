//! Worker池与就绪队列
//!
//! 一个Worker要么在就绪队列里, 要么正持有一个未完成的批次, 二者恰居其一。
//! [`Worker`] 值本身在队列和派发任务之间转移, 所有权就是独占性。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info};

use simfarm_core::{SimFarmError, SimFarmResult};
use simfarm_infrastructure::Connection;

use crate::worker_state::{WorkerState, WorkerStatus};

/// 一个Worker: 调度状态加上当前连接
#[derive(Debug)]
pub struct Worker {
    pub state: WorkerState,
    pub connection: Connection,
}

impl Worker {
    pub fn new(state: WorkerState, connection: Connection) -> Self {
        Self { state, connection }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.state.endpoint()
    }
}

/// Worker状态的只读快照
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSnapshot {
    pub endpoint: SocketAddr,
    pub status: WorkerStatus,
    pub window: usize,
    pub timeouts: u32,
    pub recoveries: u32,
    pub last_round_trip: Option<Duration>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkerState> for WorkerSnapshot {
    fn from(state: &WorkerState) -> Self {
        Self {
            endpoint: state.endpoint(),
            status: state.status(),
            window: state.window(),
            timeouts: state.timeouts(),
            recoveries: state.recoveries(),
            last_round_trip: state.last_round_trip(),
            updated_at: Utc::now(),
        }
    }
}

pub struct WorkerPool {
    ready_tx: mpsc::UnboundedSender<Worker>,
    ready_rx: Mutex<mpsc::UnboundedReceiver<Worker>>,
    members: RwLock<HashMap<SocketAddr, WorkerSnapshot>>,
    active: AtomicUsize,
    closed: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            ready_tx,
            ready_rx: Mutex::new(ready_rx),
            members: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            closed,
        }
    }

    /// 登记一个新Worker并放入就绪队列
    pub async fn register(&self, worker: Worker) -> SimFarmResult<()> {
        let endpoint = worker.endpoint();
        {
            let mut members = self.members.write().await;
            if members
                .get(&endpoint)
                .is_some_and(|m| m.status != WorkerStatus::Removed)
            {
                return Err(SimFarmError::Internal(format!("Worker {endpoint} 已经登记")));
            }
            members.insert(endpoint, WorkerSnapshot::from(&worker.state));
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        info!(worker = %endpoint, window = worker.state.window(), "Worker已加入池");
        self.enqueue(worker)
    }

    /// 取出一个就绪的Worker, 队列为空时等待; 只在池关闭后失败
    pub async fn acquire(&self) -> SimFarmResult<Worker> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(SimFarmError::PoolClosed);
        }

        let mut ready = self.ready_rx.lock().await;
        tokio::select! {
            worker = ready.recv() => worker.ok_or(SimFarmError::PoolClosed),
            _ = closed.wait_for(|closed| *closed) => Err(SimFarmError::PoolClosed),
        }
    }

    /// 把Worker放回就绪队列
    pub async fn release(&self, worker: Worker) -> SimFarmResult<()> {
        self.update(&worker.state).await;
        self.enqueue(worker)
    }

    /// 永久移除, 之后这个端点不会再出现在就绪队列里
    pub async fn remove(&self, state: &WorkerState) {
        let mut members = self.members.write().await;
        let previous = members.insert(state.endpoint(), WorkerSnapshot::from(state));
        if let Some(previous) = previous {
            if previous.status != WorkerStatus::Removed {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
        if let Some(snapshot) = members.get_mut(&state.endpoint()) {
            snapshot.status = WorkerStatus::Removed;
        }
        debug!(worker = %state.endpoint(), "Worker已从池中移除");
    }

    /// 刷新某个Worker的快照
    pub async fn update(&self, state: &WorkerState) {
        self.members
            .write()
            .await
            .insert(state.endpoint(), WorkerSnapshot::from(state));
    }

    /// 尚未被移除的Worker数量(包括正在派发和正在探测的)
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self, endpoint: SocketAddr) -> Option<WorkerSnapshot> {
        self.members.read().await.get(&endpoint).cloned()
    }

    pub async fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let mut all: Vec<_> = self.members.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.endpoint);
        all
    }

    pub async fn removed_endpoints(&self) -> Vec<SocketAddr> {
        let mut removed: Vec<_> = self
            .members
            .read()
            .await
            .values()
            .filter(|s| s.status == WorkerStatus::Removed)
            .map(|s| s.endpoint)
            .collect();
        removed.sort();
        removed
    }

    /// 关闭池, 唤醒所有阻塞在 `acquire` 上的调用方
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// 取走队列中当前所有就绪的Worker
    pub async fn drain_ready(&self) -> Vec<Worker> {
        let mut ready = self.ready_rx.lock().await;
        let mut workers = Vec::new();
        while let Ok(worker) = ready.try_recv() {
            workers.push(worker);
        }
        workers
    }

    fn enqueue(&self, worker: Worker) -> SimFarmResult<()> {
        self.ready_tx
            .send(worker)
            .map_err(|_| SimFarmError::PoolClosed)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
