use serde::{Deserialize, Serialize};

use super::{ModelArtifact, RunReport, SimulationDataSet};

/// Master发送给Worker的命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// 初始化会话: 模型描述以及本会话是否压缩负载
    Init {
        model: ModelArtifact,
        compression: bool,
    },
    /// 编码(并可能压缩)后的批次
    Task { payload: Vec<u8> },
    Ping,
    CloseConnection { model_name: String },
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Init { .. } => "INIT",
            WorkerCommand::Task { .. } => "TASK",
            WorkerCommand::Ping => "PING",
            WorkerCommand::CloseConnection { .. } => "CLOSE_CONNECTION",
        }
    }
}

/// Worker对Master命令的应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerReply {
    InitResponse,
    /// 编码(并可能压缩)后的计算结果
    Results { payload: Vec<u8> },
    Pong,
    CloseConnection,
    Error { message: String },
}

impl WorkerReply {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerReply::InitResponse => "INIT_RESPONSE",
            WorkerReply::Results { .. } => "RESULTS",
            WorkerReply::Pong => "PONG",
            WorkerReply::CloseConnection => "CLOSE_CONNECTION",
            WorkerReply::Error { .. } => "ERROR",
        }
    }
}

/// 客户端提交给Master的命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientCommand {
    Init { model: ModelArtifact },
    Data { dataset: SimulationDataSet },
    Ping,
    CloseConnection { model_name: String },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Init { .. } => "INIT",
            ClientCommand::Data { .. } => "DATA",
            ClientCommand::Ping => "PING",
            ClientCommand::CloseConnection { .. } => "CLOSE_CONNECTION",
        }
    }
}

/// Master返回给客户端的应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MasterResponse {
    InitResponse,
    DataResponse,
    Results { report: RunReport },
    Pong,
    CloseConnection,
    Error { message: String },
}

impl MasterResponse {
    pub fn name(&self) -> &'static str {
        match self {
            MasterResponse::InitResponse => "INIT_RESPONSE",
            MasterResponse::DataResponse => "DATA_RESPONSE",
            MasterResponse::Results { .. } => "RESULTS",
            MasterResponse::Pong => "PONG",
            MasterResponse::CloseConnection => "CLOSE_CONNECTION",
            MasterResponse::Error { .. } => "ERROR",
        }
    }
}
