use crate::common::{report, send_to_daemon};
use procwarden_ipc::IpcMessage;
use std::path::Path;

pub async fn pause(socket: &Path) -> anyhow::Result<()> {
    report(send_to_daemon(socket, IpcMessage::Pause).await?)
}

pub async fn restore(socket: &Path) -> anyhow::Result<()> {
    report(send_to_daemon(socket, IpcMessage::Restore).await?)
}
