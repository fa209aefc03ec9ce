use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 仿真副本任务ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// 单个仿真副本任务
///
/// 创建后不可变。同一个任务在任何Worker上重复执行都必须得到相同的结果,
/// 所以随机性完全由 `seed` 决定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub replica: u32,
    pub seed: u64,
    pub deadline: f64,
    pub samples: u32,
    pub parameters: BTreeMap<String, f64>,
}

impl Task {
    pub fn new(id: TaskId, replica: u32, seed: u64) -> Self {
        Self {
            id,
            replica,
            seed,
            deadline: 1.0,
            samples: 10,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: f64) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }
}

/// 一次往返中发送给同一个Worker的一组任务, 创建后不再拆分
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub tasks: Vec<Task>,
}

impl Batch {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|task| task.id).collect()
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}
