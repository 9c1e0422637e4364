use procwarden_core::command::RUN_MODE_ENV;
use procwarden_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

pub const PROCMGR_ID_ENV: &str = "PROCMGR_ID";

#[cfg(windows)]
const SCRIPT_EXTENSION: &str = "bat";
#[cfg(not(windows))]
const SCRIPT_EXTENSION: &str = "sh";

/// Pre-start and post-stop scripts run around bulk start and stop.
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub root_dir: PathBuf,
    pub pre_start: String,
    pub post_finish: String,
    pub mode: String,
}

impl Hooks {
    /// Resolves a hook name against the root directory. A name without an
    /// extension gets the platform script extension. `None` when absent.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.trim().is_empty() {
            return None;
        }
        let mut path = self.root_dir.join(name);
        if path.extension().is_none() {
            path.set_extension(SCRIPT_EXTENSION);
        }
        path.is_file().then_some(path)
    }

    pub async fn before_start(&self) -> Result<()> {
        match self.resolve(&self.pre_start) {
            Some(path) => self.execute(&path).await,
            None => {
                debug!("No pre-start hook '{}'", self.pre_start);
                Ok(())
            }
        }
    }

    pub async fn after_stop(&self) -> Result<()> {
        match self.resolve(&self.post_finish) {
            Some(path) => self.execute(&path).await,
            None => {
                debug!("No post-stop hook '{}'", self.post_finish);
                Ok(())
            }
        }
    }

    async fn execute(&self, path: &Path) -> Result<()> {
        let mut cmd = if cfg!(windows) || !path.extension().is_some_and(|ext| ext == "sh") {
            tokio::process::Command::new(path)
        } else {
            let mut sh = tokio::process::Command::new("sh");
            sh.arg(path);
            sh
        };

        let id = std::env::args().next().unwrap_or_default();
        cmd.env(PROCMGR_ID_ENV, id)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = path.parent() {
            cmd.current_dir(dir);
        }
        if !self.mode.is_empty() {
            cmd.env(RUN_MODE_ENV, &self.mode);
        }

        info!("===================== output begin =====================");
        let status = cmd.status().await;
        info!("=====================  output end  =====================");

        let status = status.map_err(|e| Error::Hook {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(Error::Hook {
                path: path.to_path_buf(),
                reason: format!(
                    "exited with {}",
                    procwarden_core::ExitStatus::from_std(status)
                ),
            });
        }
        Ok(())
    }
}
