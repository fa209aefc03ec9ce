//! Worker进程的监听循环, 每个连接一个会话任务

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use simfarm_core::{SimFarmError, SimFarmResult, WorkerConfig};
use simfarm_infrastructure::{Connection, ConnectionOptions};

use crate::model_registry::ModelRegistry;
use crate::session::WorkerSession;

pub struct WorkerServer {
    listener: TcpListener,
    registry: Arc<ModelRegistry>,
    options: ConnectionOptions,
}

impl WorkerServer {
    pub async fn bind(config: &WorkerConfig, registry: Arc<ModelRegistry>) -> SimFarmResult<Self> {
        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            SimFarmError::Configuration(format!("无法监听 {}: {e}", config.bind_address))
        })?;

        Ok(Self {
            listener,
            registry,
            options: ConnectionOptions::from(config),
        })
    }

    pub fn local_addr(&self) -> SimFarmResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 接受连接直到收到关闭信号; 退出时中止所有仍在进行的会话
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> SimFarmResult<()> {
        let addr = self.local_addr()?;
        info!(
            listen = %addr,
            models = ?self.registry.names(),
            "Worker开始接受连接"
        );

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "接受连接失败");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "无法设置TCP_NODELAY");
                    }

                    let connection = Connection::from_stream(stream, peer, &self.options);
                    let session = WorkerSession::new(connection, self.registry.clone());
                    let span = tracing::info_span!("worker_session", peer = %peer);
                    sessions.spawn(
                        async move {
                            if let Err(e) = session.run().await {
                                warn!(error = %e, "Worker会话异常结束");
                            }
                        }
                        .instrument(span),
                    );
                }
                Some(finished) = sessions.join_next() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Worker会话任务崩溃");
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到关闭信号, Worker停止接受连接");
                    break;
                }
            }
        }

        sessions.shutdown().await;
        Ok(())
    }
}
