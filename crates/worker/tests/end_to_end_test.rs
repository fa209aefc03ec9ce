use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use simfarm_core::{LogContext, ModelArtifact, SimFarmError, SimulationDataSet, WorkerConfig};
use simfarm_dispatcher::{CollectingSink, MasterCoordinator};
use simfarm_testing_utils::{init_test_logging, test_master_config};
use simfarm_worker::{ModelRegistry, WorkerServer, RANDOM_WALK};
use tokio::sync::broadcast;

async fn spawn_workers(count: usize) -> (Vec<SocketAddr>, broadcast::Sender<()>) {
    let (shutdown_tx, _) = broadcast::channel(1);
    let registry = Arc::new(ModelRegistry::with_builtin_models());
    let config = WorkerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        ..WorkerConfig::default()
    };

    let mut addrs = Vec::new();
    for _ in 0..count {
        let server = WorkerServer::bind(&config, registry.clone()).await.unwrap();
        addrs.push(server.local_addr().unwrap());
        tokio::spawn(server.run(shutdown_tx.subscribe()));
    }
    (addrs, shutdown_tx)
}

async fn run(addrs: &[SocketAddr], dataset: &SimulationDataSet) -> Arc<CollectingSink> {
    let sink = Arc::new(CollectingSink::new());
    let summary = MasterCoordinator::new(
        test_master_config(addrs),
        ModelArtifact::builtin(RANDOM_WALK),
        sink.clone(),
        LogContext::new("end-to-end"),
    )
    .start(dataset.expand())
    .await
    .unwrap()
    .join()
    .await
    .unwrap();

    assert_eq!(summary.submitted, dataset.replicas as usize);
    assert_eq!(summary.completed, dataset.replicas as usize);
    sink
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_master_with_real_workers() {
    init_test_logging();
    let (addrs, shutdown) = spawn_workers(2).await;

    let mut dataset = SimulationDataSet::new(RANDOM_WALK, 200);
    dataset.samples = 16;
    dataset.seed = 7;

    let sink = run(&addrs, &dataset).await;
    let mut results = sink.take();
    results.sort_by_key(|r| r.task_id);
    assert_eq!(results.len(), 200);
    assert!(results.iter().all(|r| r.trajectory.len() == 16));
    assert!(results
        .iter()
        .all(|r| r.trajectory.last_time() == Some(dataset.deadline)));

    shutdown.send(()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_do_not_depend_on_worker_count() {
    init_test_logging();
    let (one, _s1) = spawn_workers(1).await;
    let (three, _s3) = spawn_workers(3).await;

    let mut dataset = SimulationDataSet::new(RANDOM_WALK, 50);
    dataset.seed = 2024;

    let mut first = run(&one, &dataset).await.take();
    let mut second = run(&three, &dataset).await.take();
    first.sort_by_key(|r| r.task_id);
    second.sort_by_key(|r| r.task_id);
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replicas_every_worker_rejects_end_the_run() {
    init_test_logging();
    let (addrs, _shutdown) = spawn_workers(2).await;

    // Master侧不校验数据集, 由Worker拒绝每个副本
    let mut dataset = SimulationDataSet::new(RANDOM_WALK, 5);
    dataset.deadline = -1.0;

    let sink = Arc::new(CollectingSink::new());
    let handle = MasterCoordinator::new(
        test_master_config(&addrs),
        ModelArtifact::builtin(RANDOM_WALK),
        sink.clone(),
        LogContext::new("end-to-end"),
    )
    .start(dataset.expand())
    .await
    .unwrap();
    let pool = handle.pool();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("每个Worker都拒绝的副本不应让join()挂起");

    match result {
        Err(SimFarmError::AllWorkersLost { pending_tasks }) => assert_eq!(pending_tasks, 5),
        other => panic!("期望 AllWorkersLost, 实际 {other:?}"),
    }
    assert!(sink.is_empty());
    assert_eq!(pool.removed_endpoints().await.len(), 2);
    for snapshot in pool.snapshots().await {
        assert_eq!(snapshot.recoveries, 0);
    }
}
