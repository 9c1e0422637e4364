use procwarden_core::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: u64,
    pub max_files: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: procwarden_core::config::DEFAULT_LOG_BYTES,
            max_files: procwarden_core::config::DEFAULT_LOG_FILES,
        }
    }
}

/// Numbered rotation: `app.log` becomes `app.log.0001`, older files shift up
/// by one and anything past `max_files` is removed.
#[derive(Debug)]
pub struct LogRotation {
    config: RotationConfig,
}

impl LogRotation {
    pub fn new(config: RotationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn should_rotate(&self, current_size: u64) -> bool {
        current_size >= self.config.max_bytes
    }

    /// Path of the `n`th rotated file, `<path>.NNNN`.
    pub fn numbered(log_path: &Path, n: u32) -> PathBuf {
        let mut name = OsString::from(log_path.as_os_str());
        name.push(format!(".{:04}", n));
        PathBuf::from(name)
    }

    pub async fn rotate(&self, log_path: &Path) -> Result<()> {
        if !tokio_fs::try_exists(log_path).await? {
            return Ok(());
        }

        let max = self.config.max_files.max(1);
        let oldest = Self::numbered(log_path, max);
        match tokio_fs::remove_file(&oldest).await {
            Ok(()) => debug!("Removed oldest log {:?}", oldest),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        for n in (1..max).rev() {
            let from = Self::numbered(log_path, n);
            if !tokio_fs::try_exists(&from).await.unwrap_or(false) {
                continue;
            }
            let to = Self::numbered(log_path, n + 1);
            if let Err(e) = tokio_fs::rename(&from, &to).await {
                debug!("Failed to shift {:?} to {:?}: {}", from, to, e);
                tokio_fs::remove_file(&from).await?;
            }
        }

        let first = Self::numbered(log_path, 1);
        match tokio_fs::rename(log_path, &first).await {
            Ok(()) => {}
            Err(_) if cfg!(windows) => {
                // The file may still be open elsewhere.
                tokio_fs::copy(log_path, &first).await?;
                tokio_fs::write(log_path, b"").await?;
            }
            Err(e) => return Err(e.into()),
        }
        debug!("Rotated {:?} to {:?}", log_path, first);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn rotation(max_files: u32) -> LogRotation {
        LogRotation::new(RotationConfig {
            max_bytes: 10,
            max_files,
        })
    }

    #[test]
    fn test_should_rotate_by_size() {
        let rotation = rotation(3);
        assert!(!rotation.should_rotate(9));
        assert!(rotation.should_rotate(10));
        assert!(rotation.should_rotate(11));
    }

    #[test]
    fn test_numbered_path() {
        assert_eq!(
            LogRotation::numbered(Path::new("/var/log/web.log"), 7),
            PathBuf::from("/var/log/web.log.0007")
        );
    }

    #[tokio::test]
    async fn test_rotate_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("web.log");
        rotation(3).rotate(&log).await.unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rotate_shifts_and_caps() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("web.log");
        let rotation = rotation(3);

        for generation in 1..=5 {
            fs::write(&log, format!("gen{}", generation)).unwrap();
            rotation.rotate(&log).await.unwrap();
        }

        assert!(!log.exists());
        let read = |n| fs::read_to_string(LogRotation::numbered(&log, n)).unwrap();
        assert_eq!(read(1), "gen5");
        assert_eq!(read(2), "gen4");
        assert_eq!(read(3), "gen3");
        assert!(!LogRotation::numbered(&log, 4).exists());
    }
}
