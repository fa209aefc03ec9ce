pub mod api_observability;
pub mod app_config;
pub mod master_worker;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use master_worker::{MasterConfig, WorkerConfig};
