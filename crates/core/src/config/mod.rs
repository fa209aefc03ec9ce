pub mod models;

pub use models::{ApiConfig, AppConfig, MasterConfig, ObservabilityConfig, WorkerConfig};
