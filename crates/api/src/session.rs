//! 单个客户端连接上的会话

use std::sync::Arc;

use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use simfarm_core::{
    ClientCommand, LogContext, MasterConfig, MasterResponse, ModelArtifact, RunReport,
    SimFarmError, SimFarmResult, SimulationDataSet,
};
use simfarm_dispatcher::{CollectingSink, MasterCoordinator};
use simfarm_infrastructure::{Connection, MetricsCollector};

enum Flow {
    Continue,
    Close,
}

pub struct ClientSession {
    id: Uuid,
    connection: Connection,
    config: MasterConfig,
    model: Option<ModelArtifact>,
    metrics: MetricsCollector,
    log: LogContext,
}

impl ClientSession {
    pub fn new(connection: Connection, config: MasterConfig, metrics: MetricsCollector) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            connection,
            config,
            model: None,
            metrics,
            log: LogContext::new(format!("client-{id}")),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    pub async fn run(mut self) -> SimFarmResult<()> {
        let peer = self.connection.endpoint();
        info!(peer = %peer, "客户端会话开始");

        loop {
            let command: ClientCommand = match self.connection.recv().await {
                Ok(command) => command,
                Err(SimFarmError::ConnectionClosed) => {
                    debug!(peer = %peer, "客户端断开了连接");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            debug!(command = command.name(), "收到客户端命令");
            match self.handle(command).await? {
                Flow::Continue => {}
                Flow::Close => break,
            }
        }

        info!(peer = %peer, "客户端会话结束");
        self.connection.close().await
    }

    async fn handle(&mut self, command: ClientCommand) -> SimFarmResult<Flow> {
        match command {
            ClientCommand::Ping => {
                self.connection.send(&MasterResponse::Pong).await?;
                Ok(Flow::Continue)
            }
            ClientCommand::Init { model } => {
                info!(model = %model.name, format = ?model.format, "收到模型描述");
                self.model = Some(model);
                self.connection.send(&MasterResponse::InitResponse).await?;
                Ok(Flow::Continue)
            }
            ClientCommand::Data { dataset } => {
                let model = match &self.model {
                    Some(model) if model.name == dataset.model_name => model.clone(),
                    Some(model) => {
                        let e = SimFarmError::protocol(
                            format!("DATA({})", model.name),
                            format!("DATA({})", dataset.model_name),
                        );
                        self.reply_error(&e).await;
                        return Err(e);
                    }
                    None => {
                        let e = SimFarmError::protocol("INIT", "DATA");
                        self.reply_error(&e).await;
                        return Err(e);
                    }
                };

                if let Err(e) = dataset.validate() {
                    warn!(error = %e, "仿真请求无效");
                    self.connection
                        .send(&MasterResponse::Error {
                            message: e.to_string(),
                        })
                        .await?;
                    return Ok(Flow::Continue);
                }

                self.connection.send(&MasterResponse::DataResponse).await?;
                let reply = match self.simulate(model, &dataset).await {
                    Ok(report) => MasterResponse::Results { report },
                    Err(e) => {
                        warn!(error = %e, "仿真运行失败");
                        MasterResponse::Error {
                            message: e.to_string(),
                        }
                    }
                };
                self.connection.send(&reply).await?;
                Ok(Flow::Continue)
            }
            ClientCommand::CloseConnection { model_name } => {
                if let Some(model) = &self.model {
                    if model.name != model_name {
                        warn!(expected = %model.name, actual = %model_name, "关闭请求中的模型名不一致");
                    }
                }
                self.connection.send(&MasterResponse::CloseConnection).await?;
                Ok(Flow::Close)
            }
        }
    }

    /// 运行一次仿真请求, Worker全部失效时仍返回报告, 未完成的任务计入 `abandoned`
    async fn simulate(
        &self,
        model: ModelArtifact,
        dataset: &SimulationDataSet,
    ) -> SimFarmResult<RunReport> {
        let tasks = dataset.expand();
        let submitted = tasks.len();
        let sink = Arc::new(CollectingSink::new());
        let log = self.log.child("run");
        info!(
            model = %model.name,
            replicas = submitted,
            workers = self.config.workers.len(),
            "开始仿真运行"
        );

        let handle = MasterCoordinator::new(self.config.clone(), model, sink.clone(), log.clone())
            .with_metrics(self.metrics.clone())
            .start(tasks)
            .await?;
        let pool = handle.pool();

        let report = match handle.join().instrument(log.span().clone()).await {
            Ok(summary) => RunReport {
                submitted: summary.submitted,
                completed: summary.completed,
                abandoned: 0,
                removed_workers: summary
                    .removed_workers
                    .iter()
                    .map(|addr| addr.to_string())
                    .collect(),
                results: sink.take(),
            },
            Err(SimFarmError::AllWorkersLost { pending_tasks }) => {
                let results = sink.take();
                RunReport {
                    submitted,
                    completed: results.len(),
                    abandoned: pending_tasks,
                    removed_workers: pool
                        .removed_endpoints()
                        .await
                        .iter()
                        .map(|addr| addr.to_string())
                        .collect(),
                    results,
                }
            }
            Err(e) => return Err(e),
        };

        info!(
            submitted = report.submitted,
            completed = report.completed,
            abandoned = report.abandoned,
            "仿真运行结束"
        );
        Ok(report)
    }

    async fn reply_error(&mut self, error: &SimFarmError) {
        warn!(error = %error, "客户端会话出错, 即将断开");
        let reply = MasterResponse::Error {
            message: error.to_string(),
        };
        if let Err(e) = self.connection.send(&reply).await {
            debug!(error = %e, "无法发送ERROR应答");
        }
    }
}
