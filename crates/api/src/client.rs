//! 提交仿真请求的客户端

use std::net::SocketAddr;

use tracing::{debug, info};

use simfarm_core::{
    ClientCommand, MasterResponse, ModelArtifact, RunReport, SimFarmError, SimFarmResult,
    SimulationDataSet,
};
use simfarm_infrastructure::{Connection, ConnectionOptions};

pub struct SimulationClient {
    connection: Connection,
}

impl SimulationClient {
    pub async fn connect(master: SocketAddr, options: &ConnectionOptions) -> SimFarmResult<Self> {
        let connection = Connection::connect(master, options).await?;
        debug!(master = %master, "已连接到Master");
        Ok(Self { connection })
    }

    pub async fn ping(&mut self) -> SimFarmResult<()> {
        self.connection.send(&ClientCommand::Ping).await?;
        match self.connection.recv().await? {
            MasterResponse::Pong => Ok(()),
            other => Err(unexpected("PONG", other)),
        }
    }

    pub async fn init(&mut self, model: ModelArtifact) -> SimFarmResult<()> {
        self.connection.send(&ClientCommand::Init { model }).await?;
        match self.connection.recv().await? {
            MasterResponse::InitResponse => Ok(()),
            other => Err(unexpected("INIT_RESPONSE", other)),
        }
    }

    /// 提交数据集并等待运行结束; 没有超时, 运行时长取决于副本数量
    pub async fn submit(&mut self, dataset: SimulationDataSet) -> SimFarmResult<RunReport> {
        let replicas = dataset.replicas;
        self.connection
            .send(&ClientCommand::Data { dataset })
            .await?;
        match self.connection.recv().await? {
            MasterResponse::DataResponse => {}
            other => return Err(unexpected("DATA_RESPONSE", other)),
        }
        info!(replicas = replicas, "数据集已被接受, 等待结果");

        match self.connection.recv().await? {
            MasterResponse::Results { report } => Ok(report),
            other => Err(unexpected("RESULTS", other)),
        }
    }

    pub async fn close(mut self, model_name: &str) -> SimFarmResult<()> {
        self.connection
            .send(&ClientCommand::CloseConnection {
                model_name: model_name.to_string(),
            })
            .await?;
        match self.connection.recv().await? {
            MasterResponse::CloseConnection => self.connection.close().await,
            other => Err(unexpected("CLOSE_CONNECTION", other)),
        }
    }

    /// PING, INIT, DATA, 等待 RESULTS, CLOSE_CONNECTION
    pub async fn run(
        master: SocketAddr,
        options: &ConnectionOptions,
        model: ModelArtifact,
        dataset: SimulationDataSet,
    ) -> SimFarmResult<RunReport> {
        let mut client = Self::connect(master, options).await?;
        let model_name = model.name.clone();

        client.ping().await?;
        client.init(model).await?;
        let report = client.submit(dataset).await?;
        client.close(&model_name).await?;
        Ok(report)
    }
}

fn unexpected(expected: &str, response: MasterResponse) -> SimFarmError {
    match response {
        MasterResponse::Error { message } => {
            SimFarmError::protocol(expected, format!("ERROR({message})"))
        }
        other => SimFarmError::protocol(expected, other.name()),
    }
}
