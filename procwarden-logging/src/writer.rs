use crate::{LogRotation, RotationConfig};
use bytes::Bytes;
use parking_lot::Mutex;
use procwarden_core::{LogSink, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 10000;

#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    pub path: PathBuf,
    pub rotation: RotationConfig,
    pub buffer_size: usize,
    pub flush_interval: Duration,
    /// Move an existing file aside when the writer opens.
    pub rotate_on_open: bool,
}

impl LogWriterConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rotation: RotationConfig::default(),
            buffer_size: 8192,
            flush_interval: Duration::from_millis(100),
            rotate_on_open: true,
        }
    }
}

enum LogCommand {
    Write(Bytes),
    FlushAndWait(oneshot::Sender<()>),
    Rotate,
    Close,
}

/// Size-rotated log file fed through a channel.
///
/// `write` never blocks: data is queued for a background task that owns the
/// file, so a unit's output relay is never stalled by disk I/O.
pub struct LogWriter {
    path: PathBuf,
    tx: mpsc::Sender<LogCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("path", &self.path)
            .field("tx", &"<Sender>")
            .finish()
    }
}

struct OpenLog {
    path: PathBuf,
    file: BufWriter<File>,
    size: u64,
    buffer_size: usize,
    rotation: LogRotation,
}

impl OpenLog {
    async fn open(config: &LogWriterConfig) -> Result<Self> {
        let rotation = LogRotation::new(config.rotation.clone());
        if config.rotate_on_open {
            rotation.rotate(&config.path).await?;
        }
        let (file, size) = Self::open_file(&config.path, config.buffer_size).await?;
        Ok(Self {
            path: config.path.clone(),
            file,
            size,
            buffer_size: config.buffer_size,
            rotation,
        })
    }

    async fn open_file(path: &Path, buffer_size: usize) -> Result<(BufWriter<File>, u64)> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let size = file.metadata().await?.len();
        Ok((BufWriter::with_capacity(buffer_size, file), size))
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.rotation.should_rotate(self.size) {
            self.rotate().await?;
        }
        self.file.write_all(data).await?;
        self.size += data.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }

    async fn rotate(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.rotation.rotate(&self.path).await?;
        let (file, size) = Self::open_file(&self.path, self.buffer_size).await?;
        self.file = file;
        self.size = size;
        Ok(())
    }
}

impl LogWriter {
    pub async fn new(config: LogWriterConfig) -> Result<Self> {
        let mut log = OpenLog::open(&config).await?;
        let (tx, mut rx) = mpsc::channel::<LogCommand>(CHANNEL_CAPACITY);
        let flush_interval = config.flush_interval;

        let task = tokio::spawn(async move {
            let mut interval = time::interval(flush_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = log.flush().await {
                            warn!("Failed to flush {:?}: {}", log.path, e);
                        }
                    }
                    cmd = rx.recv() => {
                        match cmd {
                            Some(LogCommand::Write(data)) => {
                                if let Err(e) = log.write(&data).await {
                                    warn!("Failed to write {:?}: {}", log.path, e);
                                }
                            }
                            Some(LogCommand::FlushAndWait(done_tx)) => {
                                log.flush().await.ok();
                                let _ = done_tx.send(());
                            }
                            Some(LogCommand::Rotate) => {
                                if let Err(e) = log.rotate().await {
                                    warn!("Failed to rotate {:?}: {}", log.path, e);
                                }
                            }
                            Some(LogCommand::Close) | None => {
                                log.flush().await.ok();
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            path: config.path,
            tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        self.tx
            .try_send(LogCommand::Write(data.into()))
            .map_err(|e| {
                procwarden_core::Error::Other(anyhow::anyhow!("Failed to send log command: {}", e))
            })
    }

    pub fn write_line(&self, line: impl AsRef<str>) -> Result<()> {
        let mut data = line.as_ref().as_bytes().to_vec();
        if !data.ends_with(b"\n") {
            data.push(b'\n');
        }
        self.write(data)
    }

    /// Resolves once everything queued before the call is on disk.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(LogCommand::FlushAndWait(done_tx))
            .await
            .map_err(|e| {
                procwarden_core::Error::Other(anyhow::anyhow!("Failed to send flush command: {}", e))
            })?;

        match time::timeout(Duration::from_secs(1), done_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(procwarden_core::Error::Other(anyhow::anyhow!(
                "Flush operation failed"
            ))),
            Err(_) => Err(procwarden_core::Error::Other(anyhow::anyhow!(
                "Flush operation timed out"
            ))),
        }
    }

    pub async fn rotate(&self) -> Result<()> {
        self.tx.send(LogCommand::Rotate).await.map_err(|e| {
            procwarden_core::Error::Other(anyhow::anyhow!("Failed to send rotate command: {}", e))
        })?;
        self.flush().await
    }

    /// Flushes and stops the background task. Later writes fail.
    pub async fn close(&self) -> Result<()> {
        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };
        self.tx.send(LogCommand::Close).await.map_err(|e| {
            procwarden_core::Error::Other(anyhow::anyhow!("Failed to send close command: {}", e))
        })?;

        if time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!("Log writer for {:?} did not finish within timeout", self.path);
        }
        Ok(())
    }
}

impl LogSink for LogWriter {
    fn write(&self, data: Bytes) -> Result<()> {
        LogWriter::write(self, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(path: PathBuf, max_bytes: u64) -> LogWriterConfig {
        LogWriterConfig {
            rotation: RotationConfig {
                max_bytes,
                max_files: 3,
            },
            ..LogWriterConfig::new(path)
        }
    }

    #[tokio::test]
    async fn test_write_and_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web.log");
        let writer = LogWriter::new(config(path.clone(), 1024)).await.unwrap();

        writer.write_line("[sys] hello").unwrap();
        writer.write(&b"raw bytes"[..]).unwrap();
        writer.flush().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[sys] hello\nraw bytes"
        );
        writer.close().await.unwrap();
        assert!(writer.write_line("late").is_err());
    }

    #[tokio::test]
    async fn test_rotates_by_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web.log");
        let writer = LogWriter::new(config(path.clone(), 100)).await.unwrap();

        let chunk = "x".repeat(59) + "\n";
        writer.write_line(&chunk).unwrap();
        writer.write_line(&chunk).unwrap();
        writer.write_line("tail").unwrap();
        writer.flush().await.unwrap();

        let rotated = LogRotation::numbered(&path, 1);
        assert_eq!(std::fs::read_to_string(&rotated).unwrap().len(), 120);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tail\n");
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_file_is_moved_aside_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let writer = LogWriter::new(config(path.clone(), 1024)).await.unwrap();
        writer.write_line("this run").unwrap();
        writer.flush().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(LogRotation::numbered(&path, 1)).unwrap(),
            "previous run\n"
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "this run\n");
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_without_rotate_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web.log");
        std::fs::write(&path, "kept\n").unwrap();

        let mut cfg = config(path.clone(), 1024);
        cfg.rotate_on_open = false;
        let writer = LogWriter::new(cfg).await.unwrap();
        writer.write_line("appended").unwrap();
        writer.flush().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\nappended\n");
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_usable_as_log_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web.log");
        let writer = std::sync::Arc::new(LogWriter::new(config(path.clone(), 1024)).await.unwrap());
        let sink: std::sync::Arc<dyn LogSink> = writer.clone();

        sink.write(Bytes::from_static(&[0xff, 0x00, b'\n'])).unwrap();
        writer.flush().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xff, 0x00, b'\n']);
        writer.close().await.unwrap();
    }
}
