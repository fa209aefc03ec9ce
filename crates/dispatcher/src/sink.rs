use std::sync::{Mutex, MutexGuard};

use simfarm_core::{ReplicaResult, ResultSink};

/// 按完成顺序收集所有结果的结果接收器
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<Vec<ReplicaResult>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 取走目前收集到的所有结果
    pub fn take(&self) -> Vec<ReplicaResult> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ReplicaResult>> {
        // accept 内部不会panic, 中毒时数据依然完整
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultSink for CollectingSink {
    fn accept(&self, results: Vec<ReplicaResult>) {
        self.lock().extend(results);
    }
}
