//! 全局完成状态
//!
//! `running_workers` 和 `pending_tasks` 是原子计数; 结束标志只会被设置一次,
//! 结束结果通过 watch 通道交给 `join()`。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::futures::Notified;
use tokio::sync::{watch, Notify};

/// 一次运行的终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 所有任务都已完成
    Completed,
    /// 没有可用Worker, 仍有任务未完成
    AllWorkersLost { pending_tasks: usize },
    /// 调度循环异常退出
    Aborted { reason: String },
}

pub struct CompletionState {
    pending_tasks: AtomicUsize,
    running_workers: AtomicUsize,
    concluded: AtomicBool,
    wakeup: Notify,
    outcome: watch::Sender<Option<RunOutcome>>,
}

impl CompletionState {
    pub fn new(pending_tasks: usize) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            pending_tasks: AtomicUsize::new(pending_tasks),
            running_workers: AtomicUsize::new(0),
            concluded: AtomicBool::new(false),
            wakeup: Notify::new(),
            outcome,
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.pending_tasks.load(Ordering::SeqCst)
    }

    /// 正在执行批次的Worker数
    pub fn running_workers(&self) -> usize {
        self.running_workers.load(Ordering::SeqCst)
    }

    pub fn batch_started(&self) {
        self.running_workers.fetch_add(1, Ordering::SeqCst);
    }

    /// 批次结束(无论成败)后调用, 必须在任务已经完成或重新入队之后
    pub fn batch_finished(&self) {
        self.running_workers.fetch_sub(1, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    /// 派发任务异常终止: 先归还计数, 再以 `Aborted` 结束整次运行
    pub fn batch_aborted(&self, reason: String) {
        self.running_workers.fetch_sub(1, Ordering::SeqCst);
        self.conclude(RunOutcome::Aborted { reason });
        self.wakeup.notify_waiters();
    }

    pub fn tasks_completed(&self, count: usize) {
        self.pending_tasks.fetch_sub(count, Ordering::SeqCst);
    }

    /// 调度循环等待的唤醒点
    ///
    /// 返回的 future 需要在检查终止条件之前创建并 `enable`, 才不会错过通知。
    pub fn notified(&self) -> Notified<'_> {
        self.wakeup.notified()
    }

    /// 设置终态, 只有第一次调用生效
    pub fn conclude(&self, outcome: RunOutcome) -> bool {
        if self
            .concluded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.outcome.send_replace(Some(outcome));
        self.wakeup.notify_waiters();
        true
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded.load(Ordering::SeqCst)
    }

    /// 等待终态
    pub async fn wait(&self) -> RunOutcome {
        let mut rx = self.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(RunOutcome::Completed),
            // 发送端与self同生命周期, 不会先于接收端关闭
            Err(_) => RunOutcome::Aborted {
                reason: "完成状态通道已关闭".to_string(),
            },
        };
        outcome
    }

    /// 已设置的终态
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome.borrow().clone()
    }
}
