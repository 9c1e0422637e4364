use crate::cli::NameArgs;
use crate::common::{report, send_to_daemon};
use procwarden_ipc::IpcMessage;
use std::path::Path;

pub async fn protect(socket: &Path, args: NameArgs) -> anyhow::Result<()> {
    report(send_to_daemon(socket, IpcMessage::Protect { name: args.name }).await?)
}

pub async fn unprotect(socket: &Path, args: NameArgs) -> anyhow::Result<()> {
    report(send_to_daemon(socket, IpcMessage::Unprotect { name: args.name }).await?)
}
