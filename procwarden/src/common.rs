use anyhow::{Context, Result};
use colored::Colorize;
use procwarden_core::{Config, DaemonConfig};
use procwarden_ipc::{IpcClient, IpcMessage, IpcResponse};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Standard success indicator for all commands
pub const SUCCESS_ICON: &str = "✓";
/// Standard running indicator for status displays
pub const RUNNING_ICON: &str = "●";
/// Standard stopped indicator for status displays
pub const STOPPED_ICON: &str = "○";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket a client talks to: `--socket`, else the config's
/// `daemon.socket_path`, else the built-in default.
pub async fn resolve_socket_path(socket: Option<PathBuf>, config: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(socket) = socket {
        return Ok(socket);
    }
    match config {
        Some(path) => {
            let config = Config::load(&path)
                .await
                .with_context(|| format!("Failed to load {}", path.display()))?;
            Ok(config.daemon.socket_path)
        }
        None => Ok(DaemonConfig::default().socket_path),
    }
}

pub async fn connect_to_daemon(socket: &Path) -> Result<IpcClient> {
    debug!("Attempting to connect to daemon at {:?}", socket);

    match timeout(CONNECT_TIMEOUT, IpcClient::connect(socket)).await {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(e)) => Err(e).with_context(|| daemon_not_running_message(socket)),
        Err(_) => anyhow::bail!(
            "Connection to daemon timed out after {} seconds",
            CONNECT_TIMEOUT.as_secs()
        ),
    }
}

/// One request, one response. Control operations wait for the units to
/// settle, so the response has no timeout.
pub async fn send_to_daemon(socket: &Path, message: IpcMessage) -> Result<IpcResponse> {
    let mut client = connect_to_daemon(socket).await?;
    debug!("Sending message to daemon: {:?}", message);
    client
        .request(&message)
        .await
        .context("Error talking to daemon")
}

/// Prints a `Success` response, turns an `Error` response into a failure.
pub fn report(response: IpcResponse) -> Result<()> {
    match response {
        IpcResponse::Success { message } => {
            println!("{} {}", SUCCESS_ICON.green(), message);
            Ok(())
        }
        IpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
        IpcResponse::Data { data } => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
    }
}

pub fn daemon_not_running_message(socket: &Path) -> String {
    format!(
        "Daemon not running at {}. Start it with 'procwarden daemon --config <file>'.",
        socket.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_socket_flag_wins() {
        let socket = resolve_socket_path(
            Some(PathBuf::from("/tmp/a.sock")),
            Some(PathBuf::from("/nonexistent.json")),
        )
        .await
        .unwrap();
        assert_eq!(socket, PathBuf::from("/tmp/a.sock"));
    }

    #[tokio::test]
    async fn test_socket_from_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("procwarden.json");
        std::fs::write(&path, r#"{"daemon": {"socket_path": "/run/pw.sock"}}"#).unwrap();

        let socket = resolve_socket_path(None, Some(path)).await.unwrap();
        assert_eq!(socket, PathBuf::from("/run/pw.sock"));
    }

    #[tokio::test]
    async fn test_default_socket() {
        let socket = resolve_socket_path(None, None).await.unwrap();
        assert_eq!(socket, DaemonConfig::default().socket_path);
    }

    #[test]
    fn test_report_error_fails() {
        assert!(report(IpcResponse::success("ok")).is_ok());
        let err = report(IpcResponse::error("Unit x not found")).unwrap_err();
        assert_eq!(err.to_string(), "Unit x not found");
    }
}
