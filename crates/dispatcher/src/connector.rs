use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use simfarm_core::{MasterConfig, ModelArtifact, SimFarmResult};
use simfarm_infrastructure::{Connection, ConnectionOptions};

use crate::protocol;

/// 打开到Worker的连接并完成INIT握手
///
/// 启动时建立初始连接和恢复流程中的探测连接都经过这里。
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self, endpoint: SocketAddr) -> SimFarmResult<Connection>;
}

/// 基于TCP的默认实现
pub struct TcpWorkerConnector {
    model: ModelArtifact,
    options: ConnectionOptions,
    handshake_timeout: Duration,
}

impl TcpWorkerConnector {
    pub fn new(model: ModelArtifact, options: ConnectionOptions, handshake_timeout: Duration) -> Self {
        Self {
            model,
            options,
            handshake_timeout,
        }
    }

    pub fn from_config(model: ModelArtifact, config: &MasterConfig) -> Self {
        Self::new(model, ConnectionOptions::from(config), config.connect_timeout())
    }
}

#[async_trait]
impl WorkerConnector for TcpWorkerConnector {
    async fn connect(&self, endpoint: SocketAddr) -> SimFarmResult<Connection> {
        let mut connection = Connection::connect(endpoint, &self.options).await?;
        protocol::initialize(&mut connection, &self.model, self.handshake_timeout).await?;
        debug!(worker = %endpoint, model = %self.model.name, "INIT握手完成");
        Ok(connection)
    }
}
