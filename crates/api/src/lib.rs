//! # SimFarm API
//!
//! 面向客户端的Master服务。客户端通过长度前缀帧的TCP连接提交仿真请求:
//!
//! ```text
//! Client                      Master
//!   │ ── PING ───────────────▶ │
//!   │ ◀────────────── PONG ─── │
//!   │ ── INIT(model) ────────▶ │   保存模型描述
//!   │ ◀───── INIT_RESPONSE ─── │
//!   │ ── DATA(dataset) ──────▶ │   展开副本, 启动一次调度运行
//!   │ ◀───── DATA_RESPONSE ─── │
//!   │ ◀─────── RESULTS ─────── │   运行结束后恰好发送一次
//!   │ ── CLOSE_CONNECTION ───▶ │
//!   │ ◀── CLOSE_CONNECTION ─── │
//! ```
//!
//! 每个客户端会话都有自己的 [`LogContext`](simfarm_core::LogContext), 会话中
//! 启动的调度运行使用它派生的span, 所以并发会话的日志互不混淆。

pub mod client;
pub mod server;
pub mod session;

pub use client::SimulationClient;
pub use server::MasterServer;
pub use session::ClientSession;
