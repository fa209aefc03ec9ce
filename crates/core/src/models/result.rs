use serde::{Deserialize, Serialize};

use super::TaskId;

/// 轨迹上的一个采样点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub samples: Vec<Sample>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.samples.last().map(|sample| sample.time)
    }
}

/// 一个副本任务的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaResult {
    pub task_id: TaskId,
    pub trajectory: Trajectory,
}

/// 一个批次的解码结果, 成功时结果数量与批次大小一致且顺序相同
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputationResult {
    pub results: Vec<ReplicaResult>,
}

impl ComputationResult {
    pub fn new(results: Vec<ReplicaResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
