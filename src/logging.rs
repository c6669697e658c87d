// src/logging.rs

use crate::config::LoggingConfig;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: console output plus, if configured, a
/// plain-text copy appended to a log file. Invalid filter directives fall back
/// to `info`.
pub fn init_logging(config: &LoggingConfig) -> io::Result<()> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_target(true);

    let result = if let Some(ref log_path) = config.log_file_path {
        if let Some(parent) = Path::new(log_path).parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let file = Arc::new(Mutex::new(file));
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(move || LockedWriter { file: file.clone() });
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
    };
    result.map_err(io::Error::other)
}

struct LockedWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LockedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file mutex poisoned"))?;
        f.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file mutex poisoned"))?;
        f.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_layer_writes_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("admission.log");
        let config = LoggingConfig {
            level: "info".to_string(),
            log_file_path: Some(path.to_str().unwrap().to_string()),
        };
        init_logging(&config).unwrap();
        tracing::info!("admission logging ready");

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("admission logging ready"));

        // Only one global subscriber per process.
        assert!(init_logging(&LoggingConfig::default()).is_err());
    }
}
