use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;

/// Master端调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Worker地址列表 (host:port)
    pub workers: Vec<String>,
    /// 每个Worker初始的批次窗口
    pub initial_window: usize,
    /// 一次往返允许的最长耗时（毫秒）, 超出时窗口减半
    pub round_trip_budget_ms: u64,
    /// 往返超时的初始估计（毫秒）
    pub initial_timeout_ms: u64,
    /// 往返超时估计的下限（毫秒）
    pub min_timeout_ms: u64,
    /// 探测连接的读超时（毫秒）, 与任务超时无关
    pub probe_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// 关闭连接时等待确认的超时（毫秒）
    pub close_timeout_ms: u64,
    pub codec: CodecKind,
    pub compression: bool,
    pub max_frame_bytes: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            initial_window: 10,
            round_trip_budget_ms: 60_000,
            initial_timeout_ms: 60_000,
            min_timeout_ms: 1_000,
            probe_timeout_ms: 5_000, // 5秒探测超时
            connect_timeout_ms: 5_000,
            close_timeout_ms: 5_000,
            codec: CodecKind::default(),
            compression: true,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_window == 0 {
            return Err(anyhow::anyhow!("初始窗口必须大于0"));
        }

        if self.round_trip_budget_ms == 0 {
            return Err(anyhow::anyhow!("往返时间预算必须大于0"));
        }

        if self.initial_timeout_ms == 0 || self.min_timeout_ms == 0 {
            return Err(anyhow::anyhow!("往返超时必须大于0"));
        }

        if self.min_timeout_ms > self.initial_timeout_ms {
            return Err(anyhow::anyhow!(
                "超时下限 {}ms 不能大于初始超时 {}ms",
                self.min_timeout_ms,
                self.initial_timeout_ms
            ));
        }

        if self.probe_timeout_ms == 0 {
            return Err(anyhow::anyhow!("探测超时必须大于0"));
        }

        if self.max_frame_bytes < 1024 {
            return Err(anyhow::anyhow!("最大帧长度过小: {}", self.max_frame_bytes));
        }

        for worker in &self.workers {
            if worker.parse::<SocketAddr>().is_err() && !worker.contains(':') {
                return Err(anyhow::anyhow!("Worker地址格式无效: {}", worker));
            }
        }

        Ok(())
    }

    pub fn round_trip_budget(&self) -> Duration {
        Duration::from_millis(self.round_trip_budget_ms)
    }

    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Worker端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub bind_address: String,
    pub codec: CodecKind,
    pub max_frame_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7100".to_string(),
            codec: CodecKind::default(),
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!("监听地址格式无效: {}", self.bind_address));
        }

        if self.max_frame_bytes < 1024 {
            return Err(anyhow::anyhow!("最大帧长度过小: {}", self.max_frame_bytes));
        }

        Ok(())
    }
}
