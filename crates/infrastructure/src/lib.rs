pub mod compression;
pub mod connection;
pub mod observability;

pub use connection::{Connection, ConnectionOptions};
pub use observability::*;
