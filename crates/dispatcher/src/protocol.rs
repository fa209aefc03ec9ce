//! Master端的Worker协议交互
//!
//! 每个函数对应一条命令, 应答类型不符即为协议错误。

use std::time::Duration;

use simfarm_core::{
    Batch, ComputationResult, ModelArtifact, SimFarmError, SimFarmResult, WorkerCommand,
    WorkerReply,
};
use simfarm_infrastructure::Connection;

fn unexpected(expected: &str, reply: WorkerReply) -> SimFarmError {
    match reply {
        WorkerReply::Error { message } => {
            SimFarmError::protocol(expected, format!("ERROR({message})"))
        }
        other => SimFarmError::protocol(expected, other.name()),
    }
}

/// INIT 握手: 发送模型描述并等待 INIT_RESPONSE
pub async fn initialize(
    connection: &mut Connection,
    model: &ModelArtifact,
    timeout: Duration,
) -> SimFarmResult<()> {
    let compression = connection.compression();
    connection
        .send(&WorkerCommand::Init {
            model: model.clone(),
            compression,
        })
        .await?;

    match connection.recv_timeout(timeout, "等待INIT_RESPONSE").await? {
        WorkerReply::InitResponse => Ok(()),
        other => Err(unexpected("INIT_RESPONSE", other)),
    }
}

pub async fn ping(connection: &mut Connection, timeout: Duration) -> SimFarmResult<()> {
    connection.send(&WorkerCommand::Ping).await?;
    match connection.recv_timeout(timeout, "等待PONG").await? {
        WorkerReply::Pong => Ok(()),
        other => Err(unexpected("PONG", other)),
    }
}

/// 发送一个批次并等待其结果
///
/// 调用方负责给整个往返加上超时。结果数量和任务顺序必须与批次一致。
pub async fn send_batch(
    connection: &mut Connection,
    batch: &Batch,
) -> SimFarmResult<ComputationResult> {
    let payload = connection.encode_payload(batch)?;
    connection.send(&WorkerCommand::Task { payload }).await?;

    let result: ComputationResult = match connection.recv().await? {
        WorkerReply::Results { payload } => connection.decode_payload(&payload)?,
        other => return Err(unexpected("RESULTS", other)),
    };

    validate_results(batch, &result)?;
    Ok(result)
}

fn validate_results(batch: &Batch, result: &ComputationResult) -> SimFarmResult<()> {
    if result.len() != batch.len() {
        return Err(SimFarmError::protocol(
            format!("{} 个结果", batch.len()),
            format!("{} 个结果", result.len()),
        ));
    }

    for (task, replica) in batch.tasks.iter().zip(&result.results) {
        if task.id != replica.task_id {
            return Err(SimFarmError::protocol(
                format!("{} 的结果", task.id),
                format!("{} 的结果", replica.task_id),
            ));
        }
    }
    Ok(())
}

/// 有序关闭: CLOSE_CONNECTION 并等待对端回显
pub async fn close(
    connection: &mut Connection,
    model_name: &str,
    timeout: Duration,
) -> SimFarmResult<()> {
    connection
        .send(&WorkerCommand::CloseConnection {
            model_name: model_name.to_string(),
        })
        .await?;

    match connection.recv_timeout(timeout, "等待CLOSE_CONNECTION").await? {
        WorkerReply::CloseConnection => Ok(()),
        other => Err(unexpected("CLOSE_CONNECTION", other)),
    }
}
