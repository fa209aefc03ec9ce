use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use simfarm_core::{init_logging, AppConfig};
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{AppMode, Application, SubmitOptions};
use shutdown::{wait_for_signal, ShutdownManager};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("simfarm")
        .version("1.0.0")
        .about("分布式随机仿真副本调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径, 缺省时按默认路径查找"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["master", "worker", "submit"])
                .default_value("master"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别, 覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式, 覆盖配置文件")
                .value_parser(["json", "pretty", "compact"]),
        )
        .arg(
            Arg::new("master")
                .long("master")
                .value_name("ADDR")
                .help("Master地址 (仅在submit模式下使用)")
                .value_parser(value_parser!(SocketAddr))
                .default_value("127.0.0.1:7000"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .value_name("NAME")
                .help("模型名称")
                .default_value("random-walk"),
        )
        .arg(
            Arg::new("model-file")
                .long("model-file")
                .value_name("FILE")
                .help("模型描述文件")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("replicas")
                .long("replicas")
                .value_name("N")
                .help("副本数量")
                .value_parser(value_parser!(u32))
                .default_value("100"),
        )
        .arg(
            Arg::new("deadline")
                .long("deadline")
                .value_name("T")
                .help("仿真截止时间")
                .value_parser(value_parser!(f64))
                .default_value("10.0"),
        )
        .arg(
            Arg::new("samples")
                .long("samples")
                .value_name("K")
                .help("每条轨迹的采样点数")
                .value_parser(value_parser!(u32))
                .default_value("10"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("随机种子")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!("加载配置失败: {}", config_path.map_or("<默认>", String::as_str))
    })?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    let mode = parse_app_mode(&matches)?;
    info!("启动分布式随机仿真系统, 模式: {:?}", mode);

    let app = Application::new(config, mode.clone());
    let shutdown_manager = ShutdownManager::new();

    if !mode.is_service() {
        return app.run(shutdown_manager.subscribe().await).await;
    }

    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(async move { app.run(shutdown_rx).await });

    tokio::select! {
        _ = wait_for_signal() => {
            info!("收到关闭信号, 开始优雅关闭...");
            shutdown_manager.shutdown().await;
        }
        finished = &mut app_handle => {
            return match finished {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
    }

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("应用任务异常退出: {e}"),
        Err(_) => warn!("应用关闭超时, 强制退出"),
    }

    Ok(())
}

fn parse_app_mode(matches: &ArgMatches) -> Result<AppMode> {
    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("master");

    match mode {
        "master" => Ok(AppMode::Master),
        "worker" => Ok(AppMode::Worker),
        "submit" => Ok(AppMode::Submit(SubmitOptions {
            master: required(matches, "master")?,
            model: required(matches, "model")?,
            model_file: matches.get_one::<PathBuf>("model-file").cloned(),
            replicas: required(matches, "replicas")?,
            deadline: required(matches, "deadline")?,
            samples: required(matches, "samples")?,
            seed: required(matches, "seed")?,
        })),
        other => Err(anyhow::anyhow!("不支持的运行模式: {other}")),
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, name: &str) -> Result<T> {
    matches
        .get_one::<T>(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("缺少参数: --{name}"))
}
