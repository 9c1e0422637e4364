mod cli;
mod commands;
mod common;
mod daemon;

use clap::Parser;
use procwarden_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_CONFIG: &str = "procwarden.json";

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_client(socket: &Path, command: cli::Command) -> anyhow::Result<()> {
    match command {
        cli::Command::Status(args) => commands::status::execute(socket, args).await,
        cli::Command::Start(args) => commands::start::execute(socket, args).await,
        cli::Command::Stop(args) => commands::stop::execute(socket, args).await,
        cli::Command::Restart(args) => commands::restart::execute(socket, args).await,
        cli::Command::Enable(args) => commands::skip::enable(socket, args).await,
        cli::Command::Disable(args) => commands::skip::disable(socket, args).await,
        cli::Command::Protect(args) => commands::protect::protect(socket, args).await,
        cli::Command::Unprotect(args) => commands::protect::unprotect(socket, args).await,
        cli::Command::Pause => commands::pause::pause(socket).await,
        cli::Command::Restore => commands::pause::restore(socket).await,
        cli::Command::Daemon(_) => anyhow::bail!("daemon is not a client command"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    if let cli::Command::Daemon(args) = cli.command {
        let path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
        let config = Config::load(&path).await?;
        init_tracing(&config.daemon.log_level);
        return daemon::run(config, args).await;
    }

    init_tracing("warn");
    let socket = common::resolve_socket_path(cli.socket, cli.config).await?;
    run_client(&socket, cli.command).await
}
