use std::net::SocketAddr;
use std::time::Duration;

use simfarm_api::{MasterServer, SimulationClient};
use simfarm_core::{
    ApiConfig, ClientCommand, MasterConfig, MasterResponse, ModelArtifact, SimFarmError,
    SimulationDataSet,
};
use simfarm_infrastructure::{Connection, ConnectionOptions};
use simfarm_testing_utils::{
    init_test_logging, test_master_config, unused_address, FakeWorker, FakeWorkerMode,
};
use tokio::sync::broadcast;

const MODEL: &str = "random-walk";

async fn start_master(config: MasterConfig) -> (SocketAddr, broadcast::Sender<()>) {
    let api = ApiConfig {
        bind_address: "127.0.0.1:0".to_string(),
    };
    let server = MasterServer::bind(&api, config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_rx));
    (addr, shutdown_tx)
}

fn dataset(replicas: u32) -> SimulationDataSet {
    let mut dataset = SimulationDataSet::new(MODEL, replicas);
    dataset.seed = 11;
    dataset
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_round_trip() {
    init_test_logging();
    let workers = [
        FakeWorker::start(FakeWorkerMode::Normal).await,
        FakeWorker::start(FakeWorkerMode::Normal).await,
    ];
    let addrs: Vec<_> = workers.iter().map(|w| w.addr()).collect();
    let (master, _shutdown) = start_master(test_master_config(&addrs)).await;

    let report = SimulationClient::run(
        master,
        &ConnectionOptions::default(),
        ModelArtifact::builtin(MODEL),
        dataset(40),
    )
    .await
    .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.submitted, 40);
    assert_eq!(report.results.len(), 40);
    assert!(report.removed_workers.is_empty());

    let mut ids: Vec<u64> = report.results.iter().map(|r| r.task_id.0).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..40).collect::<Vec<_>>());
    for worker in &workers {
        assert_eq!(worker.closes(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_session_runs_several_datasets() {
    init_test_logging();
    let worker = FakeWorker::start(FakeWorkerMode::Normal).await;
    let (master, _shutdown) = start_master(test_master_config(&[worker.addr()])).await;

    let mut client = SimulationClient::connect(master, &ConnectionOptions::default())
        .await
        .unwrap();
    client.ping().await.unwrap();
    client.init(ModelArtifact::builtin(MODEL)).await.unwrap();

    let first = client.submit(dataset(5)).await.unwrap();
    let second = client.submit(dataset(7)).await.unwrap();
    client.close(MODEL).await.unwrap();

    assert_eq!(first.completed, 5);
    assert_eq!(second.completed, 7);
    assert_eq!(worker.tasks_completed(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_sent_after_all_workers_lost() {
    init_test_logging();
    let worker = FakeWorker::start(FakeWorkerMode::StallThenDie(2)).await;
    let (master, _shutdown) = start_master(test_master_config(&[worker.addr()])).await;

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        SimulationClient::run(
            master,
            &ConnectionOptions::default(),
            ModelArtifact::builtin(MODEL),
            dataset(30),
        ),
    )
    .await
    .expect("RESULTS 应当在所有Worker失效后发出")
    .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.completed, 10);
    assert_eq!(report.abandoned, 20);
    assert_eq!(report.completed + report.abandoned, report.submitted);
    assert_eq!(report.removed_workers, vec![worker.addr().to_string()]);
}

#[tokio::test]
async fn test_data_before_init_is_rejected() {
    init_test_logging();
    let worker = FakeWorker::start(FakeWorkerMode::Normal).await;
    let (master, _shutdown) = start_master(test_master_config(&[worker.addr()])).await;

    let mut connection = Connection::connect(master, &ConnectionOptions::default())
        .await
        .unwrap();
    connection
        .send(&ClientCommand::Data {
            dataset: dataset(3),
        })
        .await
        .unwrap();

    let response: MasterResponse = connection.recv().await.unwrap();
    assert!(matches!(response, MasterResponse::Error { .. }));
    assert!(matches!(
        connection.recv::<MasterResponse>().await,
        Err(SimFarmError::ConnectionClosed)
    ));
    assert_eq!(worker.connections(), 0);
}

#[tokio::test]
async fn test_no_reachable_worker_is_reported() {
    init_test_logging();
    let (master, _shutdown) = start_master(test_master_config(&[unused_address().await])).await;

    let mut client = SimulationClient::connect(master, &ConnectionOptions::default())
        .await
        .unwrap();
    client.init(ModelArtifact::builtin(MODEL)).await.unwrap();

    match client.submit(dataset(3)).await {
        Err(SimFarmError::Protocol { actual, .. }) => assert!(actual.starts_with("ERROR")),
        other => panic!("期望ERROR应答, 实际 {other:?}"),
    }
    // 会话仍然可用
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_invalid_dataset_is_rejected_before_any_dispatch() {
    init_test_logging();
    let worker = FakeWorker::start(FakeWorkerMode::Normal).await;
    let (master, _shutdown) = start_master(test_master_config(&[worker.addr()])).await;

    let mut client = SimulationClient::connect(master, &ConnectionOptions::default())
        .await
        .unwrap();
    client.init(ModelArtifact::builtin(MODEL)).await.unwrap();

    let mut bad = dataset(5);
    bad.deadline = -1.0;
    match client.submit(bad).await {
        Err(SimFarmError::Protocol { actual, .. }) => assert!(actual.contains("-1")),
        other => panic!("期望ERROR应答, 实际 {other:?}"),
    }
    assert_eq!(worker.connections(), 0);

    let report = client.submit(dataset(4)).await.unwrap();
    assert!(report.is_complete());
    client.close(MODEL).await.unwrap();
}
