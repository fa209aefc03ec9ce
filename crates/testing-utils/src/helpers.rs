//! Test helper utilities

use std::net::SocketAddr;

use simfarm_core::MasterConfig;

/// Set up logging for tests (safe to call from every test)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Master configuration with short timeouts for the given workers
///
/// Probes and post-measurement timeouts fire after 500ms, so stall scenarios
/// finish quickly while healthy round trips on loopback stay far below them.
pub fn test_master_config(workers: &[SocketAddr]) -> MasterConfig {
    MasterConfig {
        workers: workers.iter().map(|w| w.to_string()).collect(),
        initial_window: 10,
        round_trip_budget_ms: 60_000,
        initial_timeout_ms: 2_000,
        min_timeout_ms: 500,
        probe_timeout_ms: 500,
        connect_timeout_ms: 500,
        close_timeout_ms: 500,
        ..MasterConfig::default()
    }
}

/// An address nothing listens on
pub async fn unused_address() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}
