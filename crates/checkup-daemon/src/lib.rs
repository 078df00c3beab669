pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod notify;

pub use config::{Cli, DaemonConfig, RunMode};
pub use error::{DaemonError, DaemonResult};
