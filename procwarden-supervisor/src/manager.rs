use parking_lot::{Mutex, RwLock};
use procwarden_core::{Error, Result, ServiceState, SupervisionUnit, UnitStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::hooks::Hooks;

/// Aggregate snapshot of every registered unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub mode: String,
    pub units: Vec<UnitStatus>,
}

impl ManagerStatus {
    pub fn unit(&self, name: &str) -> Option<&UnitStatus> {
        self.units.iter().find(|unit| unit.name == name)
    }
}

/// Owns the named units and runs bulk operations across them.
///
/// The manager has no loop of its own: it signals units and awaits their
/// outcome. Per-unit failures are collected into one `Error::Bulk`.
pub struct Manager {
    mode: String,
    hooks: Hooks,
    units: Vec<Arc<dyn SupervisionUnit>>,
    index: HashMap<String, usize>,
    skip: RwLock<Vec<String>>,
    protect: RwLock<Vec<String>>,
    paused: Mutex<Vec<String>>,
}

impl Manager {
    pub fn new(mode: impl Into<String>, hooks: Hooks) -> Self {
        Self {
            mode: mode.into(),
            hooks,
            units: Vec::new(),
            index: HashMap::new(),
            skip: RwLock::new(Vec::new()),
            protect: RwLock::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&mut self, unit: Arc<dyn SupervisionUnit>) -> Result<()> {
        let name = unit.name().to_string();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateUnit(name));
        }
        debug!("Registered unit {} ({:?})", name, unit.kind());
        self.index.insert(name, self.units.len());
        self.units.push(unit);
        Ok(())
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name().to_string()).collect()
    }

    pub fn unit(&self, name: &str) -> Result<&Arc<dyn SupervisionUnit>> {
        self.index
            .get(name)
            .map(|&i| &self.units[i])
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// A unit without a mode runs everywhere; an empty active mode runs
    /// every unit.
    pub fn mode_matches(&self, unit_mode: &str) -> bool {
        unit_mode.is_empty() || self.mode.is_empty() || unit_mode == self.mode
    }

    fn is_eligible(&self, unit: &dyn SupervisionUnit) -> bool {
        !self.is_skipped(unit.name()) && self.mode_matches(unit.mode())
    }

    /// Runs the pre-start hook, then starts every eligible unit and awaits
    /// each one. A failing hook aborts before any unit is touched.
    pub async fn start(&self) -> Result<()> {
        self.hooks.before_start().await?;

        let targets: Vec<_> = self
            .units
            .iter()
            .filter(|unit| self.is_eligible(unit.as_ref()))
            .cloned()
            .collect();
        info!("Starting {} of {} units", targets.len(), self.units.len());
        start_all(&targets).await
    }

    /// Stops every unit, protected ones included, then runs the post-stop
    /// hook.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping all {} units", self.units.len());
        let result = stop_all(&self.units).await;
        self.run_after_stop().await;
        result
    }

    /// Stops every unit that is not protected and remembers which ones were
    /// active so `restore` can bring them back.
    pub async fn pause(&self) -> Result<()> {
        let targets: Vec<_> = self
            .units
            .iter()
            .filter(|unit| !self.is_protected(unit.name()))
            .cloned()
            .collect();

        *self.paused.lock() = targets
            .iter()
            .filter(|unit| unit.phase().service != ServiceState::Idle)
            .map(|unit| unit.name().to_string())
            .collect();
        info!("Pausing {} units", targets.len());

        let result = stop_all(&targets).await;
        self.run_after_stop().await;
        result
    }

    /// Starts again the units the last `pause` stopped. The pre-start hook
    /// is not run.
    pub async fn restore(&self) -> Result<()> {
        let paused = std::mem::take(&mut *self.paused.lock());
        let targets: Vec<_> = self
            .units
            .iter()
            .filter(|unit| paused.iter().any(|name| name == unit.name()))
            .filter(|unit| self.is_eligible(unit.as_ref()))
            .cloned()
            .collect();
        info!("Restoring {} units", targets.len());
        start_all(&targets).await
    }

    async fn run_after_stop(&self) {
        if let Err(e) = self.hooks.after_stop().await {
            warn!("Post-stop hook failed: {}", e);
        }
    }

    pub async fn start_unit(&self, name: &str) -> Result<()> {
        let unit = self.unit(name)?;
        unit.start();
        unit.until_started().await
    }

    pub async fn stop_unit(&self, name: &str) -> Result<()> {
        let unit = self.unit(name)?;
        unit.stop();
        unit.until_stopped().await
    }

    pub async fn restart_unit(&self, name: &str) -> Result<()> {
        self.unit(name)?.restart().await
    }

    pub fn enable(&self, name: &str) {
        self.skip.write().retain(|n| n != name);
    }

    pub fn disable(&self, name: &str) {
        let mut skip = self.skip.write();
        if !skip.iter().any(|n| n == name) {
            skip.push(name.to_string());
        }
    }

    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip.read().iter().any(|n| n == name)
    }

    pub fn enable_protect(&self, name: &str) {
        let mut protect = self.protect.write();
        if !protect.iter().any(|n| n == name) {
            protect.push(name.to_string());
        }
    }

    pub fn disable_protect(&self, name: &str) {
        self.protect.write().retain(|n| n != name);
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protect.read().iter().any(|n| n == name)
    }

    pub fn unit_status(&self, name: &str) -> Result<UnitStatus> {
        let unit = self.unit(name)?;
        Ok(self.decorate(unit.status()))
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            mode: self.mode.clone(),
            units: self
                .units
                .iter()
                .map(|unit| self.decorate(unit.status()))
                .collect(),
        }
    }

    fn decorate(&self, mut status: UnitStatus) -> UnitStatus {
        status.skipped = self.is_skipped(&status.name);
        status.protected = self.is_protected(&status.name);
        status
    }
}

/// Signals every unit first so startups overlap, then awaits each in turn.
async fn start_all(units: &[Arc<dyn SupervisionUnit>]) -> Result<()> {
    for unit in units {
        unit.start();
    }

    let mut failures = Vec::new();
    for unit in units {
        if let Err(e) = unit.until_started().await {
            warn!("Unit {} failed to start: {}", unit.name(), e);
            failures.push(e.to_string());
        }
    }
    Error::collect(failures)
}

async fn stop_all(units: &[Arc<dyn SupervisionUnit>]) -> Result<()> {
    for unit in units {
        unit.stop();
    }

    let mut failures = Vec::new();
    for unit in units {
        if let Err(e) = unit.until_stopped().await {
            warn!("Unit {} failed to stop: {}", unit.name(), e);
            failures.push(e.to_string());
        }
    }
    Error::collect(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use procwarden_core::{Phase, StateCell, UnitKind};

    /// Unit that settles instantly, optionally failing its start.
    struct FakeUnit {
        name: String,
        mode: String,
        fail_start: bool,
        state: StateCell,
    }

    impl FakeUnit {
        fn new(name: &str, mode: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                mode: mode.to_string(),
                fail_start: false,
                state: StateCell::new(),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                mode: String::new(),
                fail_start: true,
                state: StateCell::new(),
            })
        }
    }

    #[async_trait]
    impl SupervisionUnit for FakeUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn mode(&self) -> &str {
            &self.mode
        }

        fn kind(&self) -> UnitKind {
            UnitKind::Owned
        }

        fn start(&self) {
            if !self.fail_start {
                self.state
                    .compare_and_swap(ServiceState::Idle, ServiceState::Running);
            }
        }

        fn stop(&self) {
            self.state
                .compare_and_swap(ServiceState::Running, ServiceState::Idle);
        }

        async fn until_started(&self) -> Result<()> {
            if self.state.service() == ServiceState::Running {
                Ok(())
            } else {
                Err(Error::StartFailure {
                    name: self.name.clone(),
                    reason: "always fails".to_string(),
                })
            }
        }

        async fn until_stopped(&self) -> Result<()> {
            Ok(())
        }

        fn phase(&self) -> Phase {
            self.state.get()
        }

        fn status(&self) -> UnitStatus {
            let phase = self.state.get();
            UnitStatus {
                name: self.name.clone(),
                kind: UnitKind::Owned,
                pid: None,
                retries: 1,
                restarts: 0,
                attempts: 0,
                kill_timeout_ms: 1000,
                owned: true,
                state: phase.service.as_str().to_string(),
                srv_status: phase.service.as_str().to_string(),
                proc_status: phase.process.as_str().to_string(),
                success_marker: None,
                pidfile: None,
                mode: self.mode.clone(),
                skipped: false,
                protected: false,
                last_error: None,
            }
        }
    }

    fn manager(mode: &str, units: &[Arc<FakeUnit>]) -> Manager {
        let mut manager = Manager::new(mode, Hooks::default());
        for unit in units {
            manager.register(unit.clone()).unwrap();
        }
        manager
    }

    fn running(unit: &FakeUnit) -> bool {
        unit.state.service() == ServiceState::Running
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut manager = Manager::new("", Hooks::default());
        manager.register(FakeUnit::new("web", "")).unwrap();
        let err = manager.register(FakeUnit::new("web", "")).unwrap_err();
        assert!(matches!(err, Error::DuplicateUnit(name) if name == "web"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_mode_matching() {
        let manager = Manager::new("prod", Hooks::default());
        assert!(manager.mode_matches(""));
        assert!(manager.mode_matches("prod"));
        assert!(!manager.mode_matches("dev"));

        let any = Manager::new("", Hooks::default());
        assert!(any.mode_matches("dev"));
    }

    #[tokio::test]
    async fn test_start_respects_skip_list_and_mode() {
        let web = FakeUnit::new("web", "");
        let worker = FakeUnit::new("worker", "prod");
        let debug = FakeUnit::new("debug", "dev");
        let manager = manager("prod", &[web.clone(), worker.clone(), debug.clone()]);

        manager.disable("web");
        manager.start().await.unwrap();

        assert!(!running(&web));
        assert!(running(&worker));
        assert!(!running(&debug));
    }

    #[tokio::test]
    async fn test_bulk_start_collects_every_failure() {
        let ok = FakeUnit::new("ok", "");
        let bad1 = FakeUnit::failing("bad1");
        let bad2 = FakeUnit::failing("bad2");
        let manager = manager("", &[bad1, ok.clone(), bad2]);

        let err = manager.start().await.unwrap_err();
        assert!(running(&ok));
        match err {
            Error::Bulk(lines) => {
                assert_eq!(lines.len(), 2);
                assert!(lines[0].contains("bad1"));
                assert!(lines[1].contains("bad2"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pause_respects_protect_list_and_restore() {
        let db = FakeUnit::new("db", "");
        let web = FakeUnit::new("web", "");
        let manager = manager("", &[db.clone(), web.clone()]);
        manager.enable_protect("db");

        manager.start().await.unwrap();
        manager.pause().await.unwrap();
        assert!(running(&db));
        assert!(!running(&web));

        manager.restore().await.unwrap();
        assert!(running(&web));

        manager.stop().await.unwrap();
        assert!(!running(&db));
        assert!(!running(&web));
    }

    #[tokio::test]
    async fn test_restore_skips_units_disabled_since_pause() {
        let web = FakeUnit::new("web", "");
        let manager = manager("", &[web.clone()]);

        manager.start().await.unwrap();
        manager.pause().await.unwrap();
        manager.disable("web");
        manager.restore().await.unwrap();
        assert!(!running(&web));
    }

    #[test]
    fn test_skip_and_protect_lists() {
        let manager = manager("", &[FakeUnit::new("web", "")]);

        manager.disable("web");
        manager.disable("web");
        assert!(manager.is_skipped("web"));
        manager.enable("web");
        assert!(!manager.is_skipped("web"));

        manager.enable_protect("web");
        assert!(manager.is_protected("web"));
        manager.disable_protect("web");
        assert!(!manager.is_protected("web"));
    }

    #[tokio::test]
    async fn test_per_name_operations() {
        let web = FakeUnit::new("web", "");
        let manager = manager("", &[web.clone()]);

        assert!(matches!(
            manager.start_unit("missing").await,
            Err(Error::UnitNotFound(name)) if name == "missing"
        ));

        manager.start_unit("web").await.unwrap();
        assert!(running(&web));
        manager.restart_unit("web").await.unwrap();
        assert!(running(&web));
        manager.stop_unit("web").await.unwrap();
        assert!(!running(&web));
    }

    #[test]
    fn test_status_includes_list_membership() {
        let manager = manager("prod", &[FakeUnit::new("web", ""), FakeUnit::new("db", "")]);
        manager.disable("web");
        manager.enable_protect("db");

        let status = manager.status();
        assert_eq!(status.mode, "prod");
        assert_eq!(status.units.len(), 2);

        let web = status.unit("web").unwrap();
        assert!(web.skipped);
        assert!(!web.protected);
        let db = status.unit("db").unwrap();
        assert!(!db.skipped);
        assert!(db.protected);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["units"][0]["state"], "SRV_INIT");
        assert!(manager.unit_status("nope").is_err());
    }
}
