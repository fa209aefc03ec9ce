use thiserror::Error;

/// 仿真调度错误类型定义
#[derive(Debug, Error)]
pub enum SimFarmError {
    #[error("网络IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("操作超时: {operation} ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("连接已被对端关闭")]
    ConnectionClosed,

    #[error("协议错误: 期望 {expected}, 实际收到 {actual}")]
    Protocol { expected: String, actual: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("压缩错误: {0}")]
    Compression(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("启动时没有任何可用的Worker")]
    NoWorkersAvailable,

    #[error("所有Worker均已失效, 仍有 {pending_tasks} 个任务未完成")]
    AllWorkersLost { pending_tasks: usize },

    #[error("Worker池已关闭")]
    PoolClosed,

    #[error("模型未找到: {0}")]
    ModelNotFound(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SimFarmError {
    pub fn protocol(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Protocol {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// 传输层故障（连接重置、超时、帧不完整），可以通过探测恢复
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SimFarmError::Io(_) | SimFarmError::Timeout { .. } | SimFarmError::ConnectionClosed
        )
    }

    /// 协议违规只对当前连接致命
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SimFarmError::Protocol { .. } | SimFarmError::Serialization(_)
        )
    }
}

/// 统一的Result类型
pub type SimFarmResult<T> = std::result::Result<T, SimFarmError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_classification() {
        let io = SimFarmError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(io.is_transport());
        assert!(!io.is_protocol_violation());

        let timeout = SimFarmError::timeout("等待结果", Duration::from_millis(1500));
        assert!(timeout.is_transport());
        assert_eq!(timeout.to_string(), "操作超时: 等待结果 (1500ms)");

        let protocol = SimFarmError::protocol("PONG", "INIT_RESPONSE");
        assert!(protocol.is_protocol_violation());
        assert!(!protocol.is_transport());

        assert!(!SimFarmError::AllWorkersLost { pending_tasks: 3 }.is_transport());
    }
}
