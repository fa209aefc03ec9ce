//! Test data builders

use simfarm_core::{Task, TaskId};

/// Builder for creating test Task values
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new(TaskId(0), 0, 0).with_deadline(1.0).with_samples(4),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.task.id = TaskId(id);
        self
    }

    pub fn with_replica(mut self, replica: u32) -> Self {
        self.task.replica = replica;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.task.seed = seed;
        self
    }

    pub fn with_deadline(mut self, deadline: f64) -> Self {
        self.task.deadline = deadline;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.task.samples = samples;
        self
    }

    pub fn with_parameter(mut self, name: &str, value: f64) -> Self {
        self.task.parameters.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `n` tasks with ids, replica indices and seeds `0..n`
pub fn tasks(n: usize) -> Vec<Task> {
    (0..n as u64)
        .map(|i| {
            TaskBuilder::new()
                .with_id(i)
                .with_replica(i as u32)
                .with_seed(1000 + i)
                .build()
        })
        .collect()
}
