//! # SimFarm Testing Utils
//!
//! Shared testing utilities for the simulation farm workspace.
//!
//! - **FakeWorker**: a scripted TCP worker speaking the worker wire protocol,
//!   able to stall, die, reject batches or ignore probes on demand
//! - **Test Data Builders**: tasks with sensible defaults
//! - **Helpers**: fast-timeout master configuration, log setup, free ports
//!
//! ```toml
//! [dev-dependencies]
//! simfarm-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod fake_worker;
pub mod helpers;

pub use builders::*;
pub use fake_worker::*;
pub use helpers::*;
