use async_trait::async_trait;
use parking_lot::Mutex;
use procwarden_core::{
    EXTERN_RUNNING, Error, ExitStatus, LogSink, Phase, ProcessTree, Result,
    ServiceConfig, ServiceState, StartRequest, StateCell, SupervisionUnit, UnitKind, UnitStatus,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::UnitOptions;
use crate::owned::{SRV_END, SRV_START, isolate, until_settled};
use crate::relay::{drain, spawn_relay};
use crate::terminate::{PolledExit, Termination};

/// A unit whose process writes its own pidfile.
///
/// If the pidfile is already there on start the process is observed only and
/// never signalled. Otherwise the start command is launched and the unit owns
/// whatever pid shows up in the pidfile.
pub struct AdoptedUnit {
    inner: Arc<Inner>,
}

struct Inner {
    service: ServiceConfig,
    options: UnitOptions,
    pidfile: PathBuf,
    state: StateCell,
    owned: AtomicBool,
    sink: Arc<dyn LogSink>,
    tree: Arc<dyn ProcessTree>,
    attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
    stop_failure: watch::Sender<Option<String>>,
}

/// Reads the first line of a pidfile as a pid.
pub fn read_pidfile(path: &Path) -> Result<u32> {
    let pidfile_error = |reason: String| Error::Pidfile {
        path: path.to_path_buf(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| pidfile_error(e.to_string()))?;
    let line = content.lines().next().unwrap_or_default().trim();
    line.parse::<u32>()
        .map_err(|e| pidfile_error(format!("invalid pid '{}': {}", line, e)))
}

fn pidfile_exists(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(_) => true,
        Err(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
    }
}

impl AdoptedUnit {
    pub fn new(
        service: ServiceConfig,
        options: UnitOptions,
        sink: Arc<dyn LogSink>,
        tree: Arc<dyn ProcessTree>,
    ) -> Result<Self> {
        service.validate()?;
        let pidfile = service
            .pidfile
            .clone()
            .ok_or_else(|| Error::Config(format!("service '{}' has no pidfile", service.name)))?;
        let (stop_failure, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                service,
                options,
                pidfile,
                state: StateCell::new(),
                owned: AtomicBool::new(false),
                sink,
                tree,
                attempts: AtomicU32::new(0),
                last_error: Mutex::new(None),
                stop_failure,
            }),
        })
    }

    pub fn pidfile(&self) -> &Path {
        &self.inner.pidfile
    }

    pub fn is_owned(&self) -> bool {
        self.inner.owned.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn name(&self) -> &str {
        &self.service.name
    }

    fn log(&self, line: &str) {
        if let Err(e) = self.sink.write_line(line) {
            debug!(unit = %self.name(), "Dropped log line: {}", e);
        }
    }

    fn fail(&self, reason: String) {
        warn!(unit = %self.name(), "Start failed: {}", reason);
        *self.last_error.lock() = Some(reason);
        self.state.clear_process();
        self.state
            .compare_and_swap(ServiceState::Starting, ServiceState::Idle);
        self.log(SRV_END);
    }

    /// Runs `launch` on its own task. A crash fails the start.
    async fn supervise_launch(self: Arc<Self>) {
        let inner = self.clone();
        let run = isolate(self.name(), self.sink.as_ref(), async move {
            inner.launch().await;
            Ok(())
        });
        if let Err(e) = run.await
            && self.state.service() == ServiceState::Starting
        {
            self.fail(e.to_string());
        }
    }

    /// Runs `terminate` on its own task and returns the unit to Idle even
    /// when it crashes.
    async fn supervise_terminate(self: Arc<Self>) {
        let inner = self.clone();
        let run = isolate(self.name(), self.sink.as_ref(), async move {
            inner.terminate().await
        });
        if let Err(e) = run.await {
            self.stop_failure.send_replace(Some(e.to_string()));
        }

        self.owned.store(false, Ordering::SeqCst);
        self.state.clear_process();
        self.log(SRV_END);

        if self.state.settle() {
            self.supervise_launch().await;
        }
    }

    /// Launches the start command and waits for the pidfile to show up.
    async fn launch(self: Arc<Self>) {
        self.log(SRV_START);
        self.attempts.store(1, Ordering::Relaxed);
        *self.last_error.lock() = None;
        for line in self.service.start.describe() {
            self.log(&line);
        }

        let mut cmd = self.service.start.to_process(&self.options.run_mode);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.log(&format!("[sys] start process failed - {}", e));
                self.fail(format!("{}: {}", self.service.start.executable(), e));
                return;
            }
        };
        if let Some(pid) = child.id() {
            self.state.set_launched(pid);
        }

        let mut relays = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            relays.push(spawn_relay(stdout, self.sink.clone(), None, || {}));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(spawn_relay(stderr, self.sink.clone(), None, || {}));
        }
        let reaper = self.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => reaper.log(&format!(
                    "[sys] launcher is exited ({}).",
                    ExitStatus::from_std(status)
                )),
                Err(e) => reaper.log(&format!("[sys] wait process failed - {}", e)),
            }
            drain(relays).await;
        });

        let mut unreadable = None;
        for _ in 0..self.options.pidfile_poll_attempts {
            tokio::time::sleep(self.options.pidfile_poll_interval).await;
            if self.state.service() != ServiceState::Starting {
                return;
            }
            if !pidfile_exists(&self.pidfile) {
                continue;
            }

            // The pidfile may exist before its pid has been written.
            let pid = match read_pidfile(&self.pidfile) {
                Ok(pid) => pid,
                Err(e) => {
                    debug!(unit = %self.name(), "Pidfile not ready: {}", e);
                    unreadable = Some(e);
                    continue;
                }
            };
            self.log(&format!(
                "[sys] read pid file '{}' ok, pid = {}",
                self.pidfile.display(),
                pid
            ));
            self.state.set_launched(pid);
            self.owned.store(true, Ordering::SeqCst);
            if self
                .state
                .compare_and_swap(ServiceState::Starting, ServiceState::Running)
            {
                info!(unit = %self.name(), pid, "Service is running");
            }
            return;
        }

        match unreadable {
            Some(e) => {
                self.log(&format!("[sys] {}", e));
                self.fail(e.to_string());
            }
            None => {
                self.log(&format!(
                    "[sys] pid file '{}' is not exists.",
                    self.pidfile.display()
                ));
                self.fail(format!(
                    "pid file '{}' did not appear after {} polls",
                    self.pidfile.display(),
                    self.options.pidfile_poll_attempts
                ));
            }
        }
    }

    /// Stops an owned process. Only a failed force-kill is an error.
    async fn terminate(&self) -> Result<()> {
        let pid = match read_pidfile(&self.pidfile) {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!(unit = %self.name(), "Falling back to tracked pid: {}", e);
                self.state.pid()
            }
        };

        match pid {
            Some(pid) => {
                let waiter = PolledExit(self.tree.as_ref());
                let result = Termination {
                    name: self.name(),
                    stop: self.service.stop.as_ref(),
                    kill_timeout: self.service.kill_timeout,
                    mode: &self.options.run_mode,
                    tree: self.tree.as_ref(),
                    sink: self.sink.as_ref(),
                    waiter: &waiter,
                }
                .run(pid, None)
                .await;
                result?;
                if read_pidfile(&self.pidfile).ok() == Some(pid) {
                    // A killed process leaves its pidfile behind.
                    if let Err(e) = std::fs::remove_file(&self.pidfile) {
                        debug!(unit = %self.name(), "Failed to remove stale pidfile: {}", e);
                    }
                }
            }
            None => self.log("[sys] pid = 0"),
        }
        Ok(())
    }
}

#[async_trait]
impl SupervisionUnit for AdoptedUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn mode(&self) -> &str {
        &self.inner.service.mode
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Adopted
    }

    fn start(&self) {
        let inner = &self.inner;
        if pidfile_exists(&inner.pidfile) && inner.state.service() == ServiceState::Idle {
            inner.log(SRV_START);
            inner.log("[sys] process is already started by other");
            inner.owned.store(false, Ordering::SeqCst);
            if let Ok(pid) = read_pidfile(&inner.pidfile) {
                inner.state.set_launched(pid);
            }
            if inner
                .state
                .compare_and_swap(ServiceState::Idle, ServiceState::Running)
            {
                info!(unit = %self.name(), "Observing externally started process");
            }
            return;
        }

        match inner.state.request_start() {
            StartRequest::Launch => {
                inner.stop_failure.send_replace(None);
                tokio::spawn(inner.clone().supervise_launch());
            }
            StartRequest::Queued => debug!(unit = %self.name(), "Start queued behind stop"),
            StartRequest::Ignored => debug!(unit = %self.name(), "Already started"),
        }
    }

    fn stop(&self) {
        let inner = &self.inner;
        if !inner.owned.load(Ordering::SeqCst)
            && inner
                .state
                .compare_and_swap(ServiceState::Running, ServiceState::Idle)
        {
            inner.state.clear_process();
            inner.log("[sys] ignore process");
            inner.log(SRV_END);
            return;
        }

        if !inner
            .state
            .compare_and_swap(ServiceState::Running, ServiceState::Stopping)
            && !inner
                .state
                .compare_and_swap(ServiceState::Starting, ServiceState::Stopping)
        {
            return;
        }
        inner.stop_failure.send_replace(None);
        tokio::spawn(inner.clone().supervise_terminate());
    }

    async fn until_started(&self) -> Result<()> {
        let phase = self
            .inner
            .state
            .wait_for(|p| !p.queued && p.service != ServiceState::Starting)
            .await;
        if phase.service == ServiceState::Running {
            return Ok(());
        }
        let reason = self
            .inner
            .last_error
            .lock()
            .clone()
            .unwrap_or_else(|| format!("status is {}", phase.service));
        Err(Error::Pidfile {
            path: self.inner.pidfile.clone(),
            reason,
        })
    }

    async fn until_stopped(&self) -> Result<()> {
        until_settled(self.name(), &self.inner.state, &self.inner.stop_failure).await
    }

    fn phase(&self) -> Phase {
        self.inner.state.get()
    }

    fn status(&self) -> UnitStatus {
        let phase = self.inner.state.get();
        let owned = self.is_owned();
        let service = &self.inner.service;
        let state = if phase.service == ServiceState::Running && !owned {
            EXTERN_RUNNING.to_string()
        } else {
            phase.service.as_str().to_string()
        };

        UnitStatus {
            name: service.name.clone(),
            kind: UnitKind::Adopted,
            pid: phase.pid,
            retries: service.retries,
            restarts: 0,
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            kill_timeout_ms: service.kill_timeout.as_millis() as u64,
            owned,
            state,
            srv_status: phase.service.as_str().to_string(),
            proc_status: phase.process.as_str().to_string(),
            success_marker: service.success_flag.clone(),
            pidfile: Some(self.inner.pidfile.clone()),
            mode: service.mode.clone(),
            skipped: false,
            protected: false,
            last_error: self.inner.last_error.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_pidfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.pid");

        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pidfile(&path).unwrap(), 4242);

        std::fs::write(&path, "  77  \nextra").unwrap();
        assert_eq!(read_pidfile(&path).unwrap(), 77);

        std::fs::write(&path, "abc").unwrap();
        assert!(matches!(read_pidfile(&path), Err(Error::Pidfile { .. })));
    }

    #[test]
    fn test_missing_pidfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.pid");
        assert!(!pidfile_exists(&path));
        match read_pidfile(&path) {
            Err(Error::Pidfile { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
