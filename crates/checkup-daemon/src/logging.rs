use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{DaemonError, DaemonResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber: an optional stderr layer and an optional
/// append-only file layer, filtered by `RUST_LOG` when it is set.
pub fn init_logging(config: &LoggingConfig) -> DaemonResult<()> {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.console {
        let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        layers.push(if config.timestamps {
            console.boxed()
        } else {
            // systemd stamps every line itself
            console.without_time().boxed()
        });
    }

    if let Some(path) = &config.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|error| {
                DaemonError::Logging(format!("cannot open {}: {error}", path.display()))
            })?;
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|error| DaemonError::Logging(error.to_string()))
}
