//! 单个Worker的自适应调度状态
//!
//! 状态只被当前持有该Worker的一方修改: 正在派发批次的任务, 或者派发失败后
//! 的恢复流程。就绪队列保证两者不会同时发生, 因此这里不需要任何锁。

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use simfarm_core::{MasterConfig, SimFarmError, SimFarmResult};

/// Worker健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    Active,
    Probing,
    Removed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "ACTIVE",
            WorkerStatus::Probing => "PROBING",
            WorkerStatus::Removed => "REMOVED",
        }
    }

    /// ACTIVE 与 PROBING 可以在一次恢复中来回切换, REMOVED 是终态
    fn can_transition_to(self, next: WorkerStatus) -> bool {
        matches!(
            (self, next),
            (WorkerStatus::Active, WorkerStatus::Probing)
                | (WorkerStatus::Probing, WorkerStatus::Active)
                | (WorkerStatus::Probing, WorkerStatus::Removed)
                | (WorkerStatus::Active, WorkerStatus::Removed)
        )
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 基于每任务往返时间的超时估计 (Jacobson/Karels)
#[derive(Debug, Clone)]
struct TimeoutEstimator {
    srtt: Option<f64>,
    rttvar: f64,
    initial: Duration,
    floor: Duration,
}

impl TimeoutEstimator {
    const ALPHA: f64 = 0.125;
    const BETA: f64 = 0.25;

    fn new(initial: Duration, floor: Duration) -> Self {
        Self {
            srtt: None,
            rttvar: 0.0,
            initial,
            floor,
        }
    }

    fn observe(&mut self, per_task_secs: f64) {
        match self.srtt {
            None => {
                self.srtt = Some(per_task_secs);
                self.rttvar = per_task_secs / 2.0;
            }
            Some(srtt) => {
                self.rttvar =
                    (1.0 - Self::BETA) * self.rttvar + Self::BETA * (srtt - per_task_secs).abs();
                self.srtt = Some((1.0 - Self::ALPHA) * srtt + Self::ALPHA * per_task_secs);
            }
        }
    }

    fn timeout_for(&self, batch_size: usize) -> Duration {
        match self.srtt {
            None => self.initial,
            Some(srtt) => {
                let secs = (srtt + 4.0 * self.rttvar) * batch_size.max(1) as f64;
                Duration::try_from_secs_f64(secs)
                    .unwrap_or(Duration::MAX)
                    .max(self.floor)
            }
        }
    }
}

/// 每个Worker的调度状态
#[derive(Debug, Clone)]
pub struct WorkerState {
    endpoint: SocketAddr,
    window: usize,
    status: WorkerStatus,
    estimator: TimeoutEstimator,
    round_trip_budget: Duration,
    last_round_trip: Option<Duration>,
    last_batch_size: usize,
    timeouts: u32,
    recoveries: u32,
}

impl WorkerState {
    pub fn new(endpoint: SocketAddr, config: &MasterConfig) -> Self {
        Self {
            endpoint,
            window: config.initial_window.max(1),
            status: WorkerStatus::Active,
            estimator: TimeoutEstimator::new(config.initial_timeout(), config.min_timeout()),
            round_trip_budget: config.round_trip_budget(),
            last_round_trip: None,
            last_batch_size: 0,
            timeouts: 0,
            recoveries: 0,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn last_round_trip(&self) -> Option<Duration> {
        self.last_round_trip
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    /// 本次派发允许的批次大小
    ///
    /// 按上一次测得的每任务耗时, 如果当前窗口的整批往返会超出预算, 窗口减半。
    pub fn admissible_batch_size(&mut self) -> usize {
        if let Some(last) = self.last_round_trip {
            if self.last_batch_size > 0 {
                let per_task = last.as_secs_f64() / self.last_batch_size as f64;
                if per_task * self.window as f64 > self.round_trip_budget.as_secs_f64() {
                    self.halve_window();
                }
            }
        }
        self.window
    }

    /// 记录一次成功的往返
    pub fn record_round_trip(&mut self, batch_size: usize, elapsed: Duration) {
        let batch_size = batch_size.max(1);
        self.last_round_trip = Some(elapsed);
        self.last_batch_size = batch_size;
        self.estimator.observe(elapsed.as_secs_f64() / batch_size as f64);
    }

    /// 等待 `batch_size` 个任务结果的超时
    pub fn timeout_for(&self, batch_size: usize) -> Duration {
        self.estimator.timeout_for(batch_size)
    }

    pub fn halve_window(&mut self) {
        self.window = if self.window <= 1 { 1 } else { self.window / 2 };
    }

    /// 仅用于观测: 记录一次派发超时或失败
    pub fn mark_timed_out(&mut self) {
        self.timeouts += 1;
    }

    pub fn begin_probe(&mut self) -> SimFarmResult<()> {
        self.transition(WorkerStatus::Probing)
    }

    /// 探测成功: 窗口减半并恢复为 ACTIVE
    pub fn probe_succeeded(&mut self) -> SimFarmResult<()> {
        self.transition(WorkerStatus::Active)?;
        self.halve_window();
        self.recoveries += 1;
        Ok(())
    }

    pub fn mark_removed(&mut self) {
        self.status = WorkerStatus::Removed;
    }

    fn transition(&mut self, next: WorkerStatus) -> SimFarmResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SimFarmError::Internal(format!(
                "Worker {} 状态不能从 {} 变为 {}",
                self.endpoint, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MasterConfig {
        MasterConfig {
            initial_window: 10,
            round_trip_budget_ms: 1000,
            initial_timeout_ms: 30_000,
            min_timeout_ms: 100,
            ..MasterConfig::default()
        }
    }

    fn state() -> WorkerState {
        WorkerState::new("127.0.0.1:7100".parse().unwrap(), &config())
    }

    #[test]
    fn test_new_state_uses_initial_values() {
        let state = state();
        assert_eq!(state.window(), 10);
        assert_eq!(state.status(), WorkerStatus::Active);
        assert_eq!(state.timeout_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_window_never_drops_below_one() {
        let mut state = state();
        for _ in 0..10 {
            state.halve_window();
            assert!(state.window() >= 1);
        }
        assert_eq!(state.window(), 1);

        let zero = MasterConfig {
            initial_window: 0,
            ..config()
        };
        let state = WorkerState::new("127.0.0.1:1".parse().unwrap(), &zero);
        assert_eq!(state.window(), 1);
    }

    #[test]
    fn test_admissible_batch_size_holds_when_within_budget() {
        let mut state = state();
        // 10个任务用了500ms, 整窗预计500ms, 在1s预算内
        state.record_round_trip(10, Duration::from_millis(500));
        assert_eq!(state.admissible_batch_size(), 10);
        assert_eq!(state.admissible_batch_size(), 10);
    }

    #[test]
    fn test_admissible_batch_size_halves_when_over_budget() {
        let mut state = state();
        // 每任务300ms, 整窗3s > 1s
        state.record_round_trip(10, Duration::from_secs(3));
        assert_eq!(state.admissible_batch_size(), 5);
        // 5 * 300ms 仍然超出
        assert_eq!(state.admissible_batch_size(), 2);
        // 2 * 300ms 在预算内
        assert_eq!(state.admissible_batch_size(), 2);
    }

    #[test]
    fn test_timeout_tracks_round_trips_with_floor() {
        let mut state = state();
        state.record_round_trip(10, Duration::from_millis(10));
        // 每任务1ms, 远低于100ms下限
        assert_eq!(state.timeout_for(10), Duration::from_millis(100));

        for _ in 0..20 {
            state.record_round_trip(10, Duration::from_secs(2));
        }
        let timeout = state.timeout_for(10);
        assert!(timeout >= Duration::from_secs(2), "{timeout:?}");
        assert!(state.timeout_for(20) > timeout);
    }

    #[test]
    fn test_probe_cycle_transitions() {
        let mut state = state();
        state.mark_timed_out();
        state.begin_probe().unwrap();
        assert_eq!(state.status(), WorkerStatus::Probing);

        state.probe_succeeded().unwrap();
        assert_eq!(state.status(), WorkerStatus::Active);
        assert_eq!(state.window(), 5);
        assert_eq!(state.recoveries(), 1);
        assert_eq!(state.timeouts(), 1);

        // 不在PROBING时不能报告探测成功
        assert!(state.probe_succeeded().is_err());
    }

    #[test]
    fn test_removed_is_terminal() {
        let mut state = state();
        state.begin_probe().unwrap();
        state.mark_removed();
        assert_eq!(state.status(), WorkerStatus::Removed);
        assert!(state.begin_probe().is_err());
        assert!(state.probe_succeeded().is_err());
    }
}
