use crate::cli::NameArgs;
use crate::common::{report, send_to_daemon};
use procwarden_ipc::IpcMessage;
use std::path::Path;

pub async fn execute(socket: &Path, args: NameArgs) -> anyhow::Result<()> {
    report(send_to_daemon(socket, IpcMessage::Restart { name: args.name }).await?)
}
