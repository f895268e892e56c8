pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod shutdown;
pub mod transport;

#[cfg(test)]
mod testing;

pub use crate::config::{Credentials, DeployConfig, SyncConfig};
pub use crate::core::{SyncEngine, SyncReport, SyncStatus};
pub use crate::error::SyncError;
pub use crate::transport::{create_transport, Endpoint, Transport};
