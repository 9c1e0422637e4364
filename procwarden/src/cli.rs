use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "procwarden")]
#[command(about = "Process supervision daemon with retries, success markers and pidfile adoption", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Control socket of the daemon
    #[arg(short, long, global = true, env = "PROCWARDEN_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Config file; clients use its daemon.socket_path when --socket is absent
    #[arg(short, long, global = true, env = "PROCWARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the supervision daemon in the foreground
    Daemon(DaemonArgs),

    /// Show the status of every unit, or of one
    Status(StatusArgs),

    /// Start one unit, or every eligible unit
    Start(TargetArgs),

    /// Stop one unit, or every unit
    Stop(TargetArgs),

    /// Restart a unit
    Restart(NameArgs),

    /// Remove a unit from the skip-list
    Enable(NameArgs),

    /// Add a unit to the skip-list
    Disable(NameArgs),

    /// Add a unit to the protect-list
    Protect(NameArgs),

    /// Remove a unit from the protect-list
    Unprotect(NameArgs),

    /// Stop every unit that is not protected
    Pause,

    /// Start again the units the last pause stopped
    Restore,
}

#[derive(Parser, Debug)]
pub struct DaemonArgs {
    /// Socket path, overrides daemon.socket_path
    #[arg(long)]
    pub listen: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Unit name (optional)
    pub name: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct TargetArgs {
    /// Unit name; every unit when omitted
    pub name: Option<String>,
}

#[derive(Parser, Debug)]
pub struct NameArgs {
    /// Unit name
    pub name: String,
}
