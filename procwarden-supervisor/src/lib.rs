#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as platform;

pub mod adopted;
pub mod hooks;
pub mod manager;
pub mod owned;
pub mod process_tree;
mod relay;
pub mod schedule;
pub mod terminate;

pub use adopted::{AdoptedUnit, read_pidfile};
pub use hooks::Hooks;
pub use manager::{Manager, ManagerStatus};
pub use owned::OwnedUnit;
pub use process_tree::{SystemProcessTree, kill_tree};
pub use schedule::RestartSchedule;
pub use terminate::{ExitWaiter, PolledExit, Termination, TrackedExit};

use procwarden_core::{
    Config, DaemonConfig, LogSink, ProcessTree, Result, ServiceConfig, SupervisionUnit,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Engine timings shared by every unit of one daemon.
#[derive(Debug, Clone)]
pub struct UnitOptions {
    pub run_mode: String,
    pub respawn_interval: Duration,
    pub liveness_interval: Duration,
    pub pidfile_poll_attempts: u32,
    pub pidfile_poll_interval: Duration,
}

impl Default for UnitOptions {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for UnitOptions {
    fn from(daemon: &DaemonConfig) -> Self {
        Self {
            run_mode: daemon.mode.clone(),
            respawn_interval: daemon.respawn_interval,
            liveness_interval: daemon.liveness_interval,
            pidfile_poll_attempts: daemon.pidfile_poll_attempts,
            pidfile_poll_interval: daemon.pidfile_poll_interval,
        }
    }
}

/// Builds the unit variant a service asks for: adopted when it names a
/// pidfile, owned otherwise.
pub fn build_unit(
    service: ServiceConfig,
    options: UnitOptions,
    sink: Arc<dyn LogSink>,
    tree: Arc<dyn ProcessTree>,
) -> Result<Arc<dyn SupervisionUnit>> {
    if service.pidfile.is_some() {
        debug!("Building adopted unit {}", service.name);
        Ok(Arc::new(AdoptedUnit::new(service, options, sink, tree)?))
    } else {
        debug!("Building owned unit {}", service.name);
        Ok(Arc::new(OwnedUnit::new(service, options, sink, tree)?))
    }
}

/// Builds a manager holding one unit per configured service. The skip and
/// protect lists are seeded from each service's `disabled` and `protected`
/// flags.
pub fn build_manager<F>(config: &Config, tree: Arc<dyn ProcessTree>, mut sink_for: F) -> Result<Manager>
where
    F: FnMut(&ServiceConfig) -> Result<Arc<dyn LogSink>>,
{
    config.validate()?;
    let daemon = &config.daemon;
    let hooks = Hooks {
        root_dir: daemon.root_dir.clone(),
        pre_start: daemon.pre_start.clone(),
        post_finish: daemon.post_finish.clone(),
        mode: daemon.mode.clone(),
    };
    let options = UnitOptions::from(daemon);

    let mut manager = Manager::new(daemon.mode.clone(), hooks);
    for service in &config.services {
        let sink = sink_for(service)?;
        let unit = build_unit(service.clone(), options.clone(), sink, tree.clone())?;
        manager.register(unit)?;
        if service.disabled {
            manager.disable(&service.name);
        }
        if service.protected {
            manager.enable_protect(&service.name);
        }
    }
    Ok(manager)
}
