use crate::models::ReplicaResult;

/// 已完成副本结果的外部消费者
///
/// 结果按完成顺序交付, 不保证与提交顺序一致。调度器交付后不保留副本。
pub trait ResultSink: Send + Sync {
    fn accept(&self, results: Vec<ReplicaResult>);
}

/// 丢弃所有结果
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn accept(&self, _results: Vec<ReplicaResult>) {}
}
