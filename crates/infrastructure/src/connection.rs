//! Length-framed, optionally compressed message channel over one TCP stream.
//!
//! Every message is a single frame: a big-endian `u32` length followed by
//! the codec-encoded message. Batch and result payloads carried inside
//! messages are additionally zlib-compressed when the session enabled it.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, trace};

use simfarm_core::{CodecKind, MasterConfig, SimFarmError, SimFarmResult, WorkerConfig};

use crate::compression;

/// 建立连接所需的参数
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub codec: CodecKind,
    pub compression: bool,
    pub max_frame_bytes: usize,
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            codec: CodecKind::default(),
            compression: true,
            max_frame_bytes: 64 * 1024 * 1024,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&MasterConfig> for ConnectionOptions {
    fn from(config: &MasterConfig) -> Self {
        Self {
            codec: config.codec,
            compression: config.compression,
            max_frame_bytes: config.max_frame_bytes,
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl From<&WorkerConfig> for ConnectionOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            codec: config.codec,
            // Worker端由INIT决定是否压缩
            compression: false,
            max_frame_bytes: config.max_frame_bytes,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// 与一个对端之间的双向消息通道, 独占一个socket
pub struct Connection {
    endpoint: SocketAddr,
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    codec: CodecKind,
    compression: bool,
    max_frame_bytes: usize,
}

impl Connection {
    /// 主动连接到对端
    pub async fn connect(endpoint: SocketAddr, options: &ConnectionOptions) -> SimFarmResult<Self> {
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| SimFarmError::timeout(format!("连接 {endpoint}"), options.connect_timeout))??;
        stream.set_nodelay(true)?;

        debug!(peer = %endpoint, codec = %options.codec, "已建立连接");
        Ok(Self::from_stream(stream, endpoint, options))
    }

    /// 包装一个已经接受的连接
    pub fn from_stream(stream: TcpStream, endpoint: SocketAddr, options: &ConnectionOptions) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(options.max_frame_bytes)
            .new_codec();

        Self {
            endpoint,
            framed: Framed::new(stream, codec),
            codec: options.codec,
            compression: options.compression,
            max_frame_bytes: options.max_frame_bytes,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn set_compression(&mut self, compression: bool) {
        self.compression = compression;
    }

    pub async fn send_frame(&mut self, frame: Bytes) -> SimFarmResult<()> {
        trace!(peer = %self.endpoint, bytes = frame.len(), "发送帧");
        self.framed.send(frame).await?;
        Ok(())
    }

    pub async fn recv_frame(&mut self) -> SimFarmResult<BytesMut> {
        match self.framed.next().await {
            Some(Ok(frame)) => {
                trace!(peer = %self.endpoint, bytes = frame.len(), "收到帧");
                Ok(frame)
            }
            Some(Err(e)) => Err(SimFarmError::Io(e)),
            None => Err(SimFarmError::ConnectionClosed),
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> SimFarmResult<()> {
        let bytes = self.codec.encode(message)?;
        self.send_frame(Bytes::from(bytes)).await
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> SimFarmResult<T> {
        let frame = self.recv_frame().await?;
        self.codec.decode(&frame)
    }

    /// 带超时的读取, 超时视为传输层故障
    pub async fn recv_timeout<T: DeserializeOwned>(
        &mut self,
        timeout: Duration,
        operation: &str,
    ) -> SimFarmResult<T> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(SimFarmError::timeout(
                format!("{operation} ({})", self.endpoint),
                timeout,
            )),
        }
    }

    /// 编码负载, 会话启用压缩时再压缩
    pub fn encode_payload<T: Serialize>(&self, value: &T) -> SimFarmResult<Vec<u8>> {
        let bytes = self.codec.encode(value)?;
        if self.compression {
            compression::compress(&bytes)
        } else {
            Ok(bytes)
        }
    }

    pub fn decode_payload<T: DeserializeOwned>(&self, payload: &[u8]) -> SimFarmResult<T> {
        if self.compression {
            let bytes = compression::decompress(payload, self.max_frame_bytes)?;
            self.codec.decode(&bytes)
        } else {
            self.codec.decode(payload)
        }
    }

    /// 刷新并关闭写端, 然后释放socket
    pub async fn close(mut self) -> SimFarmResult<()> {
        SinkExt::<Bytes>::close(&mut self.framed).await?;
        debug!(peer = %self.endpoint, "连接已关闭");
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("codec", &self.codec)
            .field("compression", &self.compression)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simfarm_core::{Batch, Task, TaskId, WorkerCommand, WorkerReply};
    use tokio::net::TcpListener;

    async fn pair(options: ConnectionOptions) -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client = Connection::connect(addr, &options).await.unwrap();
        let (stream, peer) = accept.await.unwrap();
        (client, Connection::from_stream(stream, peer, &options))
    }

    #[tokio::test]
    async fn test_compressed_batch_crosses_the_wire() {
        let (mut master, mut worker) = pair(ConnectionOptions::default()).await;

        let batch = Batch::new((0..20).map(|i| Task::new(TaskId(i), i as u32, i)).collect());
        let payload = master.encode_payload(&batch).unwrap();
        master.send(&WorkerCommand::Task { payload }).await.unwrap();

        let command: WorkerCommand = worker.recv().await.unwrap();
        let WorkerCommand::Task { payload } = command else {
            panic!("期望TASK命令");
        };
        let received: Batch = worker.decode_payload(&payload).unwrap();
        assert_eq!(received, batch);
    }

    #[tokio::test]
    async fn test_peer_close_surfaces_as_connection_closed() {
        let (master, mut worker) = pair(ConnectionOptions::default()).await;
        master.close().await.unwrap();

        let err = worker.recv::<WorkerCommand>().await.unwrap_err();
        assert!(matches!(err, SimFarmError::ConnectionClosed));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_recv_timeout_is_transport_failure() {
        let (mut master, _worker) = pair(ConnectionOptions::default()).await;
        let err = master
            .recv_timeout::<WorkerReply>(Duration::from_millis(50), "等待PONG")
            .await
            .unwrap_err();
        assert!(matches!(err, SimFarmError::Timeout { .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let options = ConnectionOptions {
            max_frame_bytes: 1024,
            compression: false,
            ..ConnectionOptions::default()
        };
        let (mut master, mut worker) = pair(options).await;

        // 发送端的编码器同样受长度上限约束
        let big = WorkerCommand::Task {
            payload: vec![0u8; 4096],
        };
        assert!(master.send(&big).await.is_err());

        master.send(&WorkerCommand::Ping).await.unwrap();
        let command: WorkerCommand = worker.recv().await.unwrap();
        assert_eq!(command, WorkerCommand::Ping);
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Connection::connect(addr, &ConnectionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
