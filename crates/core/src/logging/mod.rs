//! 日志初始化以及传递给各组件的日志上下文
//!
//! 全局 subscriber 只由二进制入口安装一次。库组件在构造时接收一个
//! [`LogContext`], 并用它来装饰自己派生出的异步任务。

use anyhow::{Context, Result};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 组件级日志上下文
#[derive(Debug, Clone)]
pub struct LogContext {
    label: String,
    span: Span,
}

impl LogContext {
    /// 为一次运行（一个客户端会话）创建上下文
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let span = tracing::info_span!("simfarm", session = %label);
        Self { label, span }
    }

    /// 不输出任何span, 用于测试或嵌入场景
    pub fn disabled() -> Self {
        Self {
            label: String::new(),
            span: Span::none(),
        }
    }

    /// 派生一个子上下文
    pub fn child(&self, component: &'static str) -> Self {
        let span = tracing::info_span!(parent: &self.span, "component", name = component);
        Self {
            label: format!("{}/{}", self.label, component),
            span,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new("default")
    }
}

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true),
                )
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        "compact" => {
            registry
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()
                .context("初始化Compact日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}
