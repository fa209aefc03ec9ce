//! Master进程面向客户端的监听循环

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use simfarm_core::{ApiConfig, MasterConfig, SimFarmError, SimFarmResult};
use simfarm_infrastructure::{Connection, ConnectionOptions, MetricsCollector};

use crate::session::ClientSession;

pub struct MasterServer {
    listener: TcpListener,
    config: MasterConfig,
    options: ConnectionOptions,
    metrics: MetricsCollector,
}

impl MasterServer {
    pub async fn bind(api: &ApiConfig, config: MasterConfig) -> SimFarmResult<Self> {
        let listener = TcpListener::bind(&api.bind_address).await.map_err(|e| {
            SimFarmError::Configuration(format!("无法监听 {}: {e}", api.bind_address))
        })?;

        Ok(Self {
            listener,
            options: ConnectionOptions::from(&config),
            config,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn local_addr(&self) -> SimFarmResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 每个客户端连接一个会话任务, 直到收到关闭信号
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> SimFarmResult<()> {
        let addr = self.local_addr()?;
        info!(
            listen = %addr,
            workers = ?self.config.workers,
            "Master开始接受客户端连接"
        );

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "接受客户端连接失败");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "无法设置TCP_NODELAY");
                    }

                    let connection = Connection::from_stream(stream, peer, &self.options);
                    let session =
                        ClientSession::new(connection, self.config.clone(), self.metrics.clone());
                    let span = session.log().span().clone();
                    info!(peer = %peer, session = %session.id(), "新的客户端会话");
                    sessions.spawn(
                        async move {
                            if let Err(e) = session.run().await {
                                warn!(error = %e, "客户端会话异常结束");
                            }
                        }
                        .instrument(span),
                    );
                }
                Some(finished) = sessions.join_next() => {
                    if let Err(e) = finished {
                        error!(error = %e, "客户端会话任务崩溃");
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到关闭信号, Master停止接受客户端连接");
                    break;
                }
            }
        }

        sessions.shutdown().await;
        Ok(())
    }
}
