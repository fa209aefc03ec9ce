//! Worker端的单连接会话
//!
//! AwaitingInit ──INIT──▶ Ready ──CLOSE_CONNECTION──▶ 结束
//!
//! PING 在任何状态下都回 PONG。INIT 之前收到 TASK 属于协议违规, 回复 ERROR
//! 后断开连接。

use std::sync::Arc;

use tracing::{debug, info, warn};

use simfarm_core::{
    Batch, ComputationResult, ReplicaResult, SimFarmError, SimFarmResult, WorkerCommand,
    WorkerReply,
};
use simfarm_infrastructure::Connection;

use crate::model_registry::{ModelRegistry, SimulationModel};

enum SessionState {
    AwaitingInit,
    Ready {
        model_name: String,
        model: Arc<dyn SimulationModel>,
    },
}

enum Flow {
    Continue,
    Close,
}

pub struct WorkerSession {
    connection: Connection,
    registry: Arc<ModelRegistry>,
    state: SessionState,
}

impl WorkerSession {
    pub fn new(connection: Connection, registry: Arc<ModelRegistry>) -> Self {
        Self {
            connection,
            registry,
            state: SessionState::AwaitingInit,
        }
    }

    /// 处理命令直到对端关闭或会话结束
    pub async fn run(mut self) -> SimFarmResult<()> {
        let peer = self.connection.endpoint();
        debug!(peer = %peer, "Worker会话开始");

        loop {
            let command: WorkerCommand = match self.connection.recv().await {
                Ok(command) => command,
                Err(SimFarmError::ConnectionClosed) => {
                    debug!(peer = %peer, "Master断开了连接");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match self.handle(command).await? {
                Flow::Continue => {}
                Flow::Close => break,
            }
        }

        info!(peer = %peer, "Worker会话结束");
        self.connection.close().await
    }

    async fn handle(&mut self, command: WorkerCommand) -> SimFarmResult<Flow> {
        match command {
            WorkerCommand::Init { model, compression } => match self.registry.load(&model) {
                Ok(loaded) => {
                    info!(model = %model.name, compression = compression, "模型已加载");
                    self.state = SessionState::Ready {
                        model_name: model.name,
                        model: loaded,
                    };
                    self.connection.set_compression(compression);
                    self.connection.send(&WorkerReply::InitResponse).await?;
                    Ok(Flow::Continue)
                }
                Err(e) => {
                    self.reply_error(&e).await;
                    Err(e)
                }
            },
            WorkerCommand::Ping => {
                self.connection.send(&WorkerReply::Pong).await?;
                Ok(Flow::Continue)
            }
            WorkerCommand::Task { payload } => {
                let model = match &self.state {
                    SessionState::Ready { model, .. } => model.clone(),
                    SessionState::AwaitingInit => {
                        let e = SimFarmError::protocol("INIT", "TASK");
                        self.reply_error(&e).await;
                        return Err(e);
                    }
                };

                let batch: Batch = self.connection.decode_payload(&payload)?;
                let size = batch.len();
                let result = match execute(model, batch).await {
                    Ok(result) => result,
                    Err(e) => {
                        self.reply_error(&e).await;
                        return Err(e);
                    }
                };

                let payload = self.connection.encode_payload(&result)?;
                self.connection
                    .send(&WorkerReply::Results { payload })
                    .await?;
                debug!(batch_size = size, "批次已完成");
                Ok(Flow::Continue)
            }
            WorkerCommand::CloseConnection { model_name } => {
                if let SessionState::Ready {
                    model_name: loaded, ..
                } = &self.state
                {
                    if *loaded != model_name {
                        warn!(expected = %loaded, actual = %model_name, "关闭请求中的模型名不一致");
                    }
                }
                self.connection.send(&WorkerReply::CloseConnection).await?;
                Ok(Flow::Close)
            }
        }
    }

    async fn reply_error(&mut self, error: &SimFarmError) {
        warn!(error = %error, "会话出错, 即将断开");
        let reply = WorkerReply::Error {
            message: error.to_string(),
        };
        if let Err(e) = self.connection.send(&reply).await {
            debug!(error = %e, "无法发送ERROR应答");
        }
    }
}

/// 在阻塞线程池上按批次顺序执行所有副本
async fn execute(
    model: Arc<dyn SimulationModel>,
    batch: Batch,
) -> SimFarmResult<ComputationResult> {
    tokio::task::spawn_blocking(move || {
        batch
            .tasks
            .iter()
            .map(|task| {
                model.simulate(task).map(|trajectory| ReplicaResult {
                    task_id: task.id,
                    trajectory,
                })
            })
            .collect::<SimFarmResult<Vec<_>>>()
            .map(ComputationResult::new)
    })
    .await
    .map_err(|e| SimFarmError::Internal(format!("副本执行线程异常: {e}")))?
}
