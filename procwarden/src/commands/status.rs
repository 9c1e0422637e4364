use crate::cli::StatusArgs;
use crate::common::{RUNNING_ICON, STOPPED_ICON, send_to_daemon};
use anyhow::Context;
use colored::Colorize;
use procwarden_core::{UnitKind, UnitStatus};
use procwarden_ipc::{IpcMessage, IpcResponse};
use procwarden_supervisor::ManagerStatus;
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "")]
    icon: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "RESTARTS")]
    restarts: u64,
    #[tabled(rename = "FLAGS")]
    flags: String,
    #[tabled(rename = "LAST ERROR")]
    last_error: String,
}

impl From<&UnitStatus> for StatusRow {
    fn from(unit: &UnitStatus) -> Self {
        let mut flags = Vec::new();
        if unit.skipped {
            flags.push("skipped");
        }
        if unit.protected {
            flags.push("protected");
        }
        if !unit.mode.is_empty() {
            flags.push(unit.mode.as_str());
        }
        Self {
            icon: if unit.is_running() {
                RUNNING_ICON.to_string()
            } else {
                STOPPED_ICON.to_string()
            },
            name: unit.name.clone(),
            kind: match unit.kind {
                UnitKind::Owned => "owned".to_string(),
                UnitKind::Adopted => "adopted".to_string(),
            },
            state: unit.state.clone(),
            pid: unit.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            restarts: unit.restarts,
            flags: flags.join(","),
            last_error: unit.last_error.clone().unwrap_or_default(),
        }
    }
}

fn select(status: ManagerStatus, name: Option<&str>) -> anyhow::Result<Vec<UnitStatus>> {
    match name {
        None => Ok(status.units),
        Some(name) => status
            .units
            .into_iter()
            .find(|unit| unit.name == name)
            .map(|unit| vec![unit])
            .ok_or_else(|| anyhow::anyhow!("Unit {} not found", name)),
    }
}

fn render(units: &[UnitStatus]) -> String {
    let rows: Vec<StatusRow> = units.iter().map(StatusRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

pub async fn execute(socket: &Path, args: StatusArgs) -> anyhow::Result<()> {
    let data = match send_to_daemon(socket, IpcMessage::Status).await? {
        IpcResponse::Data { data } => data,
        IpcResponse::Error { message } => return Err(anyhow::anyhow!(message)),
        IpcResponse::Success { message } => anyhow::bail!("Unexpected response: {}", message),
    };
    let status: ManagerStatus =
        serde_json::from_value(data).context("Malformed status from daemon")?;
    let mode = status.mode.clone();
    let units = select(status, args.name.as_deref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(());
    }

    if units.is_empty() {
        println!("No units configured");
        return Ok(());
    }
    if !mode.is_empty() {
        println!("{} {}", "mode:".bold(), mode);
    }
    println!("{}", render(&units));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, state: &str, pid: Option<u32>) -> UnitStatus {
        UnitStatus {
            name: name.to_string(),
            kind: UnitKind::Owned,
            pid,
            retries: 5,
            restarts: 2,
            attempts: 1,
            kill_timeout_ms: 5000,
            owned: true,
            state: state.to_string(),
            srv_status: state.to_string(),
            proc_status: "PROC_RUNNING".to_string(),
            success_marker: None,
            pidfile: None,
            mode: String::new(),
            skipped: false,
            protected: true,
            last_error: None,
        }
    }

    #[test]
    fn test_select_by_name() {
        let status = ManagerStatus {
            mode: String::new(),
            units: vec![unit("web", "SRV_RUNNING", Some(10)), unit("db", "SRV_INIT", None)],
        };
        let picked = select(status, Some("db")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "db");
    }

    #[test]
    fn test_select_unknown_name_fails() {
        let status = ManagerStatus {
            mode: String::new(),
            units: vec![unit("web", "SRV_RUNNING", Some(10))],
        };
        assert!(select(status, Some("nope")).is_err());
    }

    #[test]
    fn test_render_table() {
        let table = render(&[unit("web", "SRV_RUNNING", Some(4242))]);
        assert!(table.contains("NAME"));
        assert!(table.contains("web"));
        assert!(table.contains("4242"));
        assert!(table.contains("protected"));
    }
}
