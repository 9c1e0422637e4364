use crate::cli::NameArgs;
use crate::common::{report, send_to_daemon};
use procwarden_ipc::IpcMessage;
use std::path::Path;

pub async fn enable(socket: &Path, args: NameArgs) -> anyhow::Result<()> {
    report(send_to_daemon(socket, IpcMessage::Enable { name: args.name }).await?)
}

pub async fn disable(socket: &Path, args: NameArgs) -> anyhow::Result<()> {
    report(send_to_daemon(socket, IpcMessage::Disable { name: args.name }).await?)
}
