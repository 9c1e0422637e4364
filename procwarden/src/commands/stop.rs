use crate::cli::TargetArgs;
use crate::common::{report, send_to_daemon};
use procwarden_ipc::IpcMessage;
use std::path::Path;

pub async fn execute(socket: &Path, args: TargetArgs) -> anyhow::Result<()> {
    let msg = match args.name {
        Some(name) => IpcMessage::Stop { name },
        None => IpcMessage::StopAll,
    };
    report(send_to_daemon(socket, msg).await?)
}
