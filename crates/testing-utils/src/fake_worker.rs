//! Scripted worker for dispatcher tests
//!
//! Speaks the worker wire protocol on a loopback port. Each connection is
//! served by a reader and a responder so that a second TASK frame arriving
//! before the first one was answered is observed as two outstanding batches.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use simfarm_core::{
    Batch, CodecKind, ComputationResult, ReplicaResult, Sample, Trajectory, WorkerCommand,
    WorkerReply,
};
use simfarm_infrastructure::compression;

const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// How the fake worker misbehaves; batch numbers count from 1 across all
/// connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeWorkerMode {
    /// Always answers
    Normal,
    /// Never answers the n-th batch; later connections (probes) behave normally
    StallOnBatch(usize),
    /// Never answers the n-th batch and drops every later connection
    StallThenDie(usize),
    /// Never answers the n-th batch; later connections accept INIT but ignore PING
    StallWithSilentProbe(usize),
    /// Answers every TASK with an ERROR reply, PING still gets PONG
    RejectBatches,
    /// Answers CLOSE_CONNECTION with PONG
    WrongCloseReply,
}

impl FakeWorkerMode {
    fn stall_batch(&self) -> Option<usize> {
        match self {
            FakeWorkerMode::Normal
            | FakeWorkerMode::RejectBatches
            | FakeWorkerMode::WrongCloseReply => None,
            FakeWorkerMode::StallOnBatch(n)
            | FakeWorkerMode::StallThenDie(n)
            | FakeWorkerMode::StallWithSilentProbe(n) => Some(*n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeWorkerConfig {
    pub mode: FakeWorkerMode,
    /// Delay before answering each batch
    pub delay: Duration,
    pub codec: CodecKind,
}

impl Default for FakeWorkerConfig {
    fn default() -> Self {
        Self {
            mode: FakeWorkerMode::Normal,
            delay: Duration::ZERO,
            codec: CodecKind::default(),
        }
    }
}

/// Counters observed by tests
#[derive(Debug, Default)]
pub struct FakeWorkerStats {
    connections: AtomicUsize,
    inits: AtomicUsize,
    batches: AtomicUsize,
    tasks_completed: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
    max_outstanding: AtomicUsize,
    stalled: AtomicBool,
}

struct Shared {
    config: FakeWorkerConfig,
    stats: FakeWorkerStats,
}

pub struct FakeWorker {
    addr: SocketAddr,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl FakeWorker {
    pub async fn start(mode: FakeWorkerMode) -> Self {
        Self::start_with(FakeWorkerConfig {
            mode,
            ..FakeWorkerConfig::default()
        })
        .await
    }

    pub async fn start_with(config: FakeWorkerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake worker");
        let addr = listener.local_addr().expect("fake worker address");
        let shared = Arc::new(Shared {
            config,
            stats: FakeWorkerStats::default(),
        });

        let handle = tokio::spawn(accept_loop(listener, shared.clone()));
        Self {
            addr,
            shared,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connections(&self) -> usize {
        self.shared.stats.connections.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.shared.stats.inits.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.shared.stats.batches.load(Ordering::SeqCst)
    }

    pub fn tasks_completed(&self) -> usize {
        self.shared.stats.tasks_completed.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.shared.stats.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.stats.closes.load(Ordering::SeqCst)
    }

    /// Largest number of unanswered batches seen on any single connection
    pub fn max_outstanding(&self) -> usize {
        self.shared.stats.max_outstanding.load(Ordering::SeqCst)
    }

    pub fn has_stalled(&self) -> bool {
        self.shared.stats.stalled.load(Ordering::SeqCst)
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    // Dropping the set aborts every connection task
    let mut sessions = JoinSet::new();
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(_) => continue,
        };
        shared.stats.connections.fetch_add(1, Ordering::SeqCst);

        let dead = matches!(shared.config.mode, FakeWorkerMode::StallThenDie(_))
            && shared.stats.stalled.load(Ordering::SeqCst);
        if dead {
            debug!(peer = %peer, "fake worker is dead, dropping connection");
            drop(stream);
            continue;
        }

        sessions.spawn(serve(stream, shared.clone()));
    }
}

type Writer = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_PAYLOAD)
        .new_codec();
    let (writer, mut reader) = Framed::new(stream, codec).split();
    let (tx, rx) = mpsc::unbounded_channel();
    let outstanding = Arc::new(AtomicUsize::new(0));

    let read = {
        let shared = shared.clone();
        let outstanding = outstanding.clone();
        async move {
            while let Some(Ok(frame)) = reader.next().await {
                let Ok(command) = shared.config.codec.decode::<WorkerCommand>(&frame) else {
                    break;
                };
                if matches!(command, WorkerCommand::Task { .. }) {
                    let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                    shared
                        .stats
                        .max_outstanding
                        .fetch_max(now, Ordering::SeqCst);
                }
                if tx.send(command).is_err() {
                    break;
                }
            }
        }
    };

    tokio::join!(read, respond(writer, rx, shared, outstanding));
}

async fn respond(
    mut writer: Writer,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    shared: Arc<Shared>,
    outstanding: Arc<AtomicUsize>,
) {
    let codec = shared.config.codec;
    let stats = &shared.stats;
    let mut compression_enabled = false;

    while let Some(command) = commands.recv().await {
        let reply = match command {
            WorkerCommand::Init { compression, .. } => {
                stats.inits.fetch_add(1, Ordering::SeqCst);
                compression_enabled = compression;
                WorkerReply::InitResponse
            }
            WorkerCommand::Ping => {
                stats.pings.fetch_add(1, Ordering::SeqCst);
                let silent = matches!(shared.config.mode, FakeWorkerMode::StallWithSilentProbe(_))
                    && stats.stalled.load(Ordering::SeqCst);
                if silent {
                    continue;
                }
                WorkerReply::Pong
            }
            WorkerCommand::Task { payload } => {
                let number = stats.batches.fetch_add(1, Ordering::SeqCst) + 1;
                if shared.config.mode.stall_batch() == Some(number) {
                    stats.stalled.store(true, Ordering::SeqCst);
                    debug!(batch = number, "fake worker stalls");
                    std::future::pending::<()>().await;
                }
                if shared.config.mode == FakeWorkerMode::RejectBatches {
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                    WorkerReply::Error {
                        message: format!("batch {number} rejected"),
                    }
                } else {
                    if !shared.config.delay.is_zero() {
                        tokio::time::sleep(shared.config.delay).await;
                    }

                    let Some(batch) = decode_batch(codec, compression_enabled, &payload) else {
                        break;
                    };
                    let result = compute(&batch);
                    let Some(payload) = encode_result(codec, compression_enabled, &result) else {
                        break;
                    };
                    stats
                        .tasks_completed
                        .fetch_add(batch.len(), Ordering::SeqCst);
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                    WorkerReply::Results { payload }
                }
            }
            WorkerCommand::CloseConnection { .. } => {
                stats.closes.fetch_add(1, Ordering::SeqCst);
                if shared.config.mode == FakeWorkerMode::WrongCloseReply {
                    WorkerReply::Pong
                } else {
                    WorkerReply::CloseConnection
                }
            }
        };

        let Ok(bytes) = codec.encode(&reply) else {
            break;
        };
        if writer.send(Bytes::from(bytes)).await.is_err() {
            break;
        }
    }
}

fn decode_batch(codec: CodecKind, compressed: bool, payload: &[u8]) -> Option<Batch> {
    if compressed {
        let bytes = compression::decompress(payload, MAX_PAYLOAD).ok()?;
        codec.decode(&bytes).ok()
    } else {
        codec.decode(payload).ok()
    }
}

fn encode_result(
    codec: CodecKind,
    compressed: bool,
    result: &ComputationResult,
) -> Option<Vec<u8>> {
    let bytes = codec.encode(result).ok()?;
    if compressed {
        compression::compress(&bytes).ok()
    } else {
        Some(bytes)
    }
}

/// One sample per task derived only from the task itself
fn compute(batch: &Batch) -> ComputationResult {
    ComputationResult::new(
        batch
            .tasks
            .iter()
            .map(|task| ReplicaResult {
                task_id: task.id,
                trajectory: Trajectory {
                    samples: vec![Sample {
                        time: task.deadline,
                        values: vec![task.seed as f64],
                    }],
                },
            })
            .collect(),
    )
}
