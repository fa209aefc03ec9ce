use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use simfarm_api::{MasterServer, SimulationClient};
use simfarm_core::{AppConfig, ModelArtifact, RunReport, SimulationDataSet};
use simfarm_infrastructure::{init_metrics, ConnectionOptions, MetricsCollector};
use simfarm_worker::{ModelRegistry, WorkerServer};

/// 提交模式的参数
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub master: SocketAddr,
    pub model: String,
    /// 领域语言描述文件, 缺省时使用Worker内置模型
    pub model_file: Option<PathBuf>,
    pub replicas: u32,
    pub deadline: f64,
    pub samples: u32,
    pub seed: u64,
}

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 接受客户端请求并把副本分发给Worker
    Master,
    /// 执行Master派发的副本
    Worker,
    /// 向Master提交一次仿真请求后退出
    Submit(SubmitOptions),
}

impl AppMode {
    pub fn is_service(&self) -> bool {
        !matches!(self, AppMode::Submit(_))
    }
}

pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        info!("初始化应用程序, 模式: {:?}", mode);
        Self { config, mode }
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match &self.mode {
            AppMode::Master => self.run_master(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::Submit(options) => {
                let report = self.run_submit(options).await?;
                print_report(&report);
                Ok(())
            }
        }
    }

    async fn run_master(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if self.config.master.workers.is_empty() {
            warn!("没有配置任何Worker, 所有仿真请求都会失败");
        }

        if let Some(listen) = &self.config.observability.metrics_listen {
            let listen: SocketAddr = listen
                .parse()
                .with_context(|| format!("指标导出地址无效: {listen}"))?;
            init_metrics(listen)?;
        }

        let server = MasterServer::bind(&self.config.api, self.config.master.clone())
            .await
            .context("启动Master服务失败")?
            .with_metrics(MetricsCollector::new());
        server.run(shutdown_rx).await?;

        info!("Master服务已停止");
        Ok(())
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let registry = Arc::new(ModelRegistry::with_builtin_models());
        let server = WorkerServer::bind(&self.config.worker, registry)
            .await
            .context("启动Worker服务失败")?;
        server.run(shutdown_rx).await?;

        info!("Worker服务已停止");
        Ok(())
    }

    async fn run_submit(&self, options: &SubmitOptions) -> Result<RunReport> {
        let model = match &options.model_file {
            Some(path) => {
                let source = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("读取模型文件失败: {}", path.display()))?;
                ModelArtifact::dsl(&options.model, source)
            }
            None => ModelArtifact::builtin(&options.model),
        };

        let mut dataset = SimulationDataSet::new(&options.model, options.replicas);
        dataset.deadline = options.deadline;
        dataset.samples = options.samples;
        dataset.seed = options.seed;

        info!(
            master = %options.master,
            model = %options.model,
            replicas = options.replicas,
            "提交仿真请求"
        );
        let report = SimulationClient::run(
            options.master,
            &ConnectionOptions::from(&self.config.master),
            model,
            dataset,
        )
        .await
        .context("仿真请求失败")?;

        Ok(report)
    }
}

fn print_report(report: &RunReport) {
    println!(
        "submitted={} completed={} abandoned={}",
        report.submitted, report.completed, report.abandoned
    );
    for worker in &report.removed_workers {
        println!("removed worker: {worker}");
    }

    let mut results: Vec<_> = report.results.iter().collect();
    results.sort_by_key(|result| result.task_id);
    for result in results {
        let last = result
            .trajectory
            .samples
            .last()
            .map(|sample| format!("t={} {:?}", sample.time, sample.values))
            .unwrap_or_else(|| "-".to_string());
        println!("{}\t{}", result.task_id, last);
    }
}
