use anyhow::Context;
use procwarden_core::{Config, LogSink, ServiceConfig, StdoutSink};
use procwarden_ipc::{IpcConnection, IpcMessage, IpcResponse, IpcServer};
use procwarden_logging::{LogConfig, LogManager};
use procwarden_supervisor::{Manager, SystemProcessTree, build_manager};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cli::DaemonArgs;

pub struct Daemon {
    manager: Arc<Manager>,
    log_manager: Arc<LogManager>,
    tree: Arc<SystemProcessTree>,
    config: Config,
    socket_path: PathBuf,
}

impl Daemon {
    pub async fn new(config: Config, args: DaemonArgs) -> anyhow::Result<Self> {
        let log_manager = Arc::new(LogManager::new(LogConfig::from(&config.daemon)));
        let tree = Arc::new(SystemProcessTree::new());

        let mut sinks: HashMap<String, Arc<dyn LogSink>> = HashMap::new();
        for service in &config.services {
            let sink: Arc<dyn LogSink> = if config.daemon.print {
                Arc::new(StdoutSink)
            } else {
                log_manager
                    .get_writer(&service.name)
                    .await
                    .with_context(|| format!("Failed to open log for {}", service.name))?
            };
            sinks.insert(service.name.clone(), sink);
        }

        let manager = build_manager(&config, tree.clone(), |service: &ServiceConfig| {
            sinks.remove(&service.name).ok_or_else(|| {
                procwarden_core::Error::Config(format!("no log sink for {}", service.name))
            })
        })?;

        let socket_path = args
            .listen
            .unwrap_or_else(|| config.daemon.socket_path.clone());

        Ok(Self {
            manager: Arc::new(manager),
            log_manager,
            tree,
            config,
            socket_path,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            "procwarden daemon starting, {} units, mode '{}'",
            self.manager.len(),
            self.manager.mode()
        );

        let refresher = self.tree.spawn_refresher(self.config.daemon.process_refresh);
        let server = IpcServer::bind(&self.socket_path)
            .await
            .with_context(|| format!("Failed to bind {}", self.socket_path.display()))?;
        info!("Listening on {}", self.socket_path.display());

        if let Err(e) = self.manager.start().await {
            match e {
                procwarden_core::Error::Hook { .. } => {
                    error!("Start aborted: {}", e);
                    refresher.abort();
                    self.log_manager.close_all().await;
                    return Err(e.into());
                }
                _ => error!("Some units failed to start:\n{}", e),
            }
        }

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = server.accept() => {
                    match accepted {
                        Ok(conn) => {
                            let manager = self.manager.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(conn, manager).await {
                                    debug!("IPC connection ended with error: {}", e);
                                }
                            });
                        }
                        Err(e) => warn!("Failed to accept IPC connection: {}", e),
                    }
                }

                result = &mut shutdown => {
                    if let Err(e) = result {
                        error!("Signal handling failed: {}", e);
                    }
                    break;
                }
            }
        }

        self.shutdown(refresher).await
    }

    async fn shutdown(self, refresher: tokio::task::JoinHandle<()>) -> anyhow::Result<()> {
        info!("Shutting down daemon...");
        if let Err(e) = self.manager.stop().await {
            error!("Some units failed to stop:\n{}", e);
        }
        refresher.abort();
        self.log_manager.close_all().await;
        info!("Daemon shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C");
    }
    Ok(())
}

async fn serve_connection(mut conn: IpcConnection, manager: Arc<Manager>) -> anyhow::Result<()> {
    while let Some(msg) = conn.recv().await? {
        debug!("IPC request: {:?}", msg);
        let response = dispatch(&manager, msg).await;
        conn.send(&response).await?;
    }
    Ok(())
}

/// Applies one control request to the manager.
pub async fn dispatch(manager: &Manager, msg: IpcMessage) -> IpcResponse {
    if let Some(name) = msg.unit()
        && let Err(e) = manager.unit(name)
    {
        return IpcResponse::error(e.to_string());
    }

    let result = match msg {
        IpcMessage::Status => {
            return match serde_json::to_value(manager.status()) {
                Ok(data) => IpcResponse::Data { data },
                Err(e) => IpcResponse::error(format!("Failed to encode status: {}", e)),
            };
        }
        IpcMessage::Start { name } => manager
            .start_unit(&name)
            .await
            .map(|_| format!("Started {}", name)),
        IpcMessage::Stop { name } => manager
            .stop_unit(&name)
            .await
            .map(|_| format!("Stopped {}", name)),
        IpcMessage::Restart { name } => manager
            .restart_unit(&name)
            .await
            .map(|_| format!("Restarted {}", name)),
        IpcMessage::Enable { name } => {
            manager.enable(&name);
            Ok(format!("Enabled {}", name))
        }
        IpcMessage::Disable { name } => {
            manager.disable(&name);
            Ok(format!("Disabled {}", name))
        }
        IpcMessage::Protect { name } => {
            manager.enable_protect(&name);
            Ok(format!("Protected {}", name))
        }
        IpcMessage::Unprotect { name } => {
            manager.disable_protect(&name);
            Ok(format!("Unprotected {}", name))
        }
        IpcMessage::StartAll => manager.start().await.map(|_| "Started all units".to_string()),
        IpcMessage::StopAll => manager.stop().await.map(|_| "Stopped all units".to_string()),
        IpcMessage::Pause => manager.pause().await.map(|_| "Paused".to_string()),
        IpcMessage::Restore => manager.restore().await.map(|_| "Restored".to_string()),
    };

    match result {
        Ok(message) => IpcResponse::success(message),
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

pub async fn run(config: Config, args: DaemonArgs) -> anyhow::Result<()> {
    let daemon = Daemon::new(config, args).await?;
    daemon.run().await
}
