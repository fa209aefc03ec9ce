//! Pluggable payload codec.
//!
//! The codec is chosen once at startup from a fixed set. Nothing in the
//! dispatch path depends on which one is active, only on the
//! `encode`/`decode` contract.

use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{SimFarmError, SimFarmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// 文本JSON, 便于调试
    Json,
    /// bincode 标准配置
    #[default]
    Bincode,
    /// MessagePack
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl CodecKind {
    pub const ALL: [CodecKind; 3] = [CodecKind::Json, CodecKind::Bincode, CodecKind::MessagePack];

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> SimFarmResult<Vec<u8>> {
        match self {
            CodecKind::Json => serde_json::to_vec(value)
                .map_err(|e| SimFarmError::Serialization(format!("JSON编码失败: {e}"))),
            CodecKind::Bincode => {
                bincode::serde::encode_to_vec(value, bincode::config::standard())
                    .map_err(|e| SimFarmError::Serialization(format!("bincode编码失败: {e}")))
            }
            CodecKind::MessagePack => rmp_serde::to_vec(value)
                .map_err(|e| SimFarmError::Serialization(format!("MessagePack编码失败: {e}"))),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> SimFarmResult<T> {
        match self {
            CodecKind::Json => serde_json::from_slice(bytes)
                .map_err(|e| SimFarmError::Serialization(format!("JSON解码失败: {e}"))),
            CodecKind::Bincode => {
                bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                    .map(|(value, _)| value)
                    .map_err(|e| SimFarmError::Serialization(format!("bincode解码失败: {e}")))
            }
            CodecKind::MessagePack => rmp_serde::from_slice(bytes)
                .map_err(|e| SimFarmError::Serialization(format!("MessagePack解码失败: {e}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::Json => "json",
            CodecKind::Bincode => "bincode",
            CodecKind::MessagePack => "msgpack",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = SimFarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "bincode" => Ok(CodecKind::Bincode),
            "msgpack" | "messagepack" => Ok(CodecKind::MessagePack),
            other => Err(SimFarmError::Configuration(format!(
                "不支持的编解码器: {other}, 支持: json, bincode, msgpack"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Batch, Task, TaskId, WorkerCommand};

    #[test]
    fn test_every_codec_carries_a_task_command() {
        let batch = Batch::new(vec![Task::new(TaskId(7), 3, 42)
            .with_deadline(10.0)
            .with_parameter("drift", 0.25)]);

        for codec in CodecKind::ALL {
            let payload = codec.encode(&batch).unwrap();
            let command = WorkerCommand::Task { payload };
            let bytes = codec.encode(&command).unwrap();

            let decoded: WorkerCommand = codec.decode(&bytes).unwrap();
            let WorkerCommand::Task { payload } = decoded else {
                panic!("{codec}: 解码后的命令类型错误");
            };
            let decoded_batch: Batch = codec.decode(&payload).unwrap();
            assert_eq!(decoded_batch, batch, "{codec}");
        }
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = CodecKind::Json
            .decode::<WorkerCommand>(b"not json at all")
            .unwrap_err();
        assert!(matches!(err, SimFarmError::Serialization(_)));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_parse_codec_kind() {
        assert_eq!("JSON".parse::<CodecKind>().unwrap(), CodecKind::Json);
        assert_eq!("msgpack".parse::<CodecKind>().unwrap(), CodecKind::MessagePack);
        assert!("protobuf".parse::<CodecKind>().is_err());
    }
}
