use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use simfarm_core::Task;

/// 待派发任务的有序积压队列, 以及在途任务计数
pub struct TaskSource {
    backlog: Mutex<VecDeque<Task>>,
    submitted: usize,
    in_flight: AtomicUsize,
}

impl TaskSource {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            submitted: tasks.len(),
            backlog: Mutex::new(tasks.into()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// 从队首取出至多 `n` 个任务, 取出的任务计为在途
    pub async fn take_up_to(&self, n: usize) -> Vec<Task> {
        let mut backlog = self.backlog.lock().await;
        let count = n.min(backlog.len());
        let taken: Vec<Task> = backlog.drain(..count).collect();
        self.in_flight.fetch_add(taken.len(), Ordering::SeqCst);
        taken
    }

    /// 在途任务成功完成
    pub fn complete(&self, count: usize) {
        self.in_flight.fetch_sub(count, Ordering::SeqCst);
    }

    /// 失败批次的任务按原顺序放回队首
    pub async fn requeue(&self, tasks: Vec<Task>) {
        let count = tasks.len();
        {
            let mut backlog = self.backlog.lock().await;
            for task in tasks.into_iter().rev() {
                backlog.push_front(task);
            }
        }
        self.in_flight.fetch_sub(count, Ordering::SeqCst);
        debug!(count = count, "任务已重新入队");
    }

    /// 积压队列中尚未派发的任务数
    pub async fn backlog_len(&self) -> usize {
        self.backlog.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backlog.lock().await.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simfarm_core::TaskId;

    fn tasks(n: u64) -> Vec<Task> {
        (0..n).map(|i| Task::new(TaskId(i), i as u32, i)).collect()
    }

    fn ids(tasks: &[Task]) -> Vec<u64> {
        tasks.iter().map(|t| t.id.0).collect()
    }

    #[tokio::test]
    async fn test_take_up_to_respects_order_and_bound() {
        let source = TaskSource::new(tasks(5));
        assert_eq!(source.submitted(), 5);

        let first = source.take_up_to(3).await;
        assert_eq!(ids(&first), vec![0, 1, 2]);
        assert_eq!(source.in_flight(), 3);

        let rest = source.take_up_to(10).await;
        assert_eq!(ids(&rest), vec![3, 4]);
        assert!(source.is_empty().await);
        assert!(source.take_up_to(4).await.is_empty());
        assert_eq!(source.in_flight(), 5);
    }

    #[tokio::test]
    async fn test_requeue_goes_to_front_in_order() {
        let source = TaskSource::new(tasks(6));
        let failed = source.take_up_to(3).await;
        let ok = source.take_up_to(1).await;

        source.requeue(failed).await;
        source.complete(ok.len());
        assert_eq!(source.in_flight(), 0);
        assert_eq!(source.backlog_len().await, 5);

        let next = source.take_up_to(5).await;
        assert_eq!(ids(&next), vec![0, 1, 2, 4, 5]);
    }
}
