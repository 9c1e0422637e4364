mod rotation;
mod writer;

pub use rotation::{LogRotation, RotationConfig};
pub use writer::{LogWriter, LogWriterConfig};

use parking_lot::Mutex;
use procwarden_core::{DaemonConfig, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub base_dir: PathBuf,
    pub max_file_size: u64,
    pub max_files: u32,
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for LogConfig {
    fn from(daemon: &DaemonConfig) -> Self {
        Self {
            base_dir: daemon.log_path(),
            max_file_size: daemon.log_max_bytes,
            max_files: daemon.log_max_files,
            buffer_size: 8192,
            flush_interval_ms: 100,
        }
    }
}

/// Hands out one rotating writer per unit, `<base_dir>/<name>.log`.
#[derive(Debug)]
pub struct LogManager {
    writers: Mutex<HashMap<String, Arc<LogWriter>>>,
    config: LogConfig,
}

impl LogManager {
    pub fn new(config: LogConfig) -> Self {
        debug!(
            "Creating LogManager with base_dir: {:?}, max_file_size: {}, max_files: {}",
            config.base_dir, config.max_file_size, config.max_files
        );
        Self {
            writers: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.config.base_dir.join(format!("{}.log", name))
    }

    pub async fn get_writer(&self, name: &str) -> Result<Arc<LogWriter>> {
        if let Some(writer) = self.writers.lock().get(name) {
            trace!("Using existing log writer for unit: {}", name);
            return Ok(writer.clone());
        }

        let log_path = self.log_path(name);
        debug!("Creating log writer for unit {} at {:?}", name, log_path);
        let writer_config = LogWriterConfig {
            path: log_path.clone(),
            rotation: RotationConfig {
                max_bytes: self.config.max_file_size,
                max_files: self.config.max_files,
            },
            buffer_size: self.config.buffer_size,
            flush_interval: Duration::from_millis(self.config.flush_interval_ms),
            rotate_on_open: true,
        };

        let writer = Arc::new(LogWriter::new(writer_config).await.map_err(|e| {
            error!("Failed to create log writer for unit {} at {:?}: {}", name, log_path, e);
            e
        })?);

        // Another caller may have raced us here; keep the first writer.
        let mut writers = self.writers.lock();
        let writer = writers.entry(name.to_string()).or_insert(writer).clone();
        debug!("Log writers open: {}", writers.len());
        Ok(writer)
    }

    pub async fn remove_writer(&self, name: &str) {
        let writer = self.writers.lock().remove(name);
        if let Some(writer) = writer
            && let Err(e) = writer.close().await
        {
            warn!("Failed to close log writer for {}: {}", name, e);
        }
    }

    pub async fn flush_all(&self) -> Result<()> {
        let writers: Vec<_> = self.writers.lock().values().cloned().collect();
        for writer in writers {
            writer.flush().await?;
        }
        Ok(())
    }

    pub async fn close_all(&self) {
        let writers: Vec<_> = self.writers.lock().drain().collect();
        for (name, writer) in writers {
            if let Err(e) = writer.close().await {
                warn!("Failed to close log writer for {}: {}", name, e);
            }
        }
    }
}
