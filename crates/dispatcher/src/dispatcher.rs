//! 调度循环
//!
//! 单个循环反复: 取一个就绪Worker, 计算允许的批次大小, 从积压队列取任务,
//! 把发送和等待结果交给一个新派生的任务, 然后继续取下一个Worker。
//! 每个在途批次一个任务, 所以多个Worker的往返并行进行。

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinError;
use tracing::{debug, error, info, Instrument};

use simfarm_core::{Batch, LogContext, SimFarmError, SimFarmResult, Task};
use simfarm_infrastructure::{MetricsCollector, StructuredLogger};

use crate::completion::{CompletionState, RunOutcome};
use crate::protocol;
use crate::result_handler::ResultHandler;
use crate::task_source::TaskSource;
use crate::worker_pool::{Worker, WorkerPool};

pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    source: Arc<TaskSource>,
    completion: Arc<CompletionState>,
    handler: Arc<ResultHandler>,
    metrics: MetricsCollector,
    log: LogContext,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        source: Arc<TaskSource>,
        completion: Arc<CompletionState>,
        handler: Arc<ResultHandler>,
        metrics: MetricsCollector,
        log: LogContext,
    ) -> Self {
        Self {
            pool,
            source,
            completion,
            handler,
            metrics,
            log,
        }
    }

    /// 运行调度循环直到终止条件成立, 并设置完成状态
    pub async fn run(self) -> RunOutcome {
        let outcome = match self.run_loop().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "调度循环异常退出");
                RunOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        };

        info!(outcome = ?outcome, "调度循环结束");
        self.completion.conclude(outcome.clone());
        outcome
    }

    async fn run_loop(&self) -> SimFarmResult<RunOutcome> {
        info!(
            tasks = self.source.submitted(),
            workers = self.pool.active_count(),
            "调度循环启动"
        );

        loop {
            // 先登记唤醒再检查条件, 两者之间的通知不会丢失
            let notified = self.completion.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // 派发任务异常终止时由监督任务提前设置终态
            if let Some(outcome) = self.completion.outcome() {
                return Ok(outcome);
            }
            if let Some(outcome) = self.terminal_state().await {
                return Ok(outcome);
            }

            let mut worker = tokio::select! {
                acquired = self.pool.acquire() => acquired?,
                _ = &mut notified => continue,
            };

            let size = worker.state.admissible_batch_size();
            let tasks = self.source.take_up_to(size).await;
            if tasks.is_empty() {
                // 积压暂时为空但仍有批次在途, 等待下一次完成
                self.pool.release(worker).await?;
                notified.await;
                continue;
            }

            self.completion.batch_started();
            self.spawn_dispatch(worker, Batch::new(tasks));
        }
    }

    /// 终止条件, 只在没有批次在途时成立
    async fn terminal_state(&self) -> Option<RunOutcome> {
        if self.completion.running_workers() > 0 {
            return None;
        }

        let backlog = self.source.backlog_len().await;
        self.metrics.update_pending_tasks(backlog);
        self.metrics.update_active_workers(self.pool.active_count());

        if backlog == 0 {
            return Some(RunOutcome::Completed);
        }
        if self.pool.active_count() == 0 {
            return Some(RunOutcome::AllWorkersLost {
                pending_tasks: backlog,
            });
        }
        None
    }

    fn spawn_dispatch(&self, worker: Worker, batch: Batch) {
        let endpoint = worker.endpoint();
        StructuredLogger::log_batch_dispatched(endpoint, batch.len(), worker.state.window());
        self.metrics.record_batch_dispatched(batch.len());

        let handler = self.handler.clone();
        let span = tracing::info_span!(parent: self.log.span(), "dispatch", worker = %endpoint);
        let tasks = batch.tasks.clone();
        let running = tokio::spawn(dispatch(handler, worker, batch).instrument(span.clone()));

        let source = self.source.clone();
        let completion = self.completion.clone();
        tokio::spawn(
            async move {
                if let Err(e) = running.await {
                    supervise_failed(&source, &completion, tasks, e).await;
                }
            }
            .instrument(span),
        );
    }
}

/// 派发任务panic或被取消: 任务放回队首, 整次运行以 `Aborted` 结束
async fn supervise_failed(
    source: &TaskSource,
    completion: &CompletionState,
    tasks: Vec<Task>,
    error: JoinError,
) {
    error!(error = %error, tasks = tasks.len(), "派发任务异常终止");
    source.requeue(tasks).await;
    completion.batch_aborted(format!("派发任务异常终止: {error}"));
}

/// 一次往返: 发送批次, 在超时内等待结果, 然后交给 [`ResultHandler`]
///
/// 所有错误都在这里转入失败路径, 不会越过派发边界。
async fn dispatch(handler: Arc<ResultHandler>, mut worker: Worker, batch: Batch) {
    let timeout = worker.state.timeout_for(batch.len());
    let started = Instant::now();

    let result = match tokio::time::timeout(
        timeout,
        protocol::send_batch(&mut worker.connection, &batch),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SimFarmError::timeout(
            format!("等待 {} 的结果", worker.endpoint()),
            timeout,
        )),
    };

    match result {
        Ok(result) => {
            debug!(batch_size = batch.len(), "收到批次结果");
            handler
                .on_success(worker, batch, result, started.elapsed())
                .await
        }
        Err(e) => handler.on_failure(worker, batch, e).await,
    }
}
