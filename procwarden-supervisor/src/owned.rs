use async_trait::async_trait;
use parking_lot::Mutex;
use procwarden_core::{
    Error, ExitStatus, LogSink, Phase, ProcessState, ProcessTree, Result, ServiceConfig,
    ServiceState, StartRequest, StateCell, StopStrategy, StreamMatcher, SupervisionUnit,
    UnitKind, UnitStatus,
};
use std::any::Any;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::UnitOptions;
use crate::relay::{drain, spawn_relay};
use crate::schedule::RestartSchedule;
use crate::terminate::{Termination, TrackedExit};

pub(crate) const SRV_START: &str = "[sys] ==================== srv  start ====================";
pub(crate) const SRV_END: &str = "[sys] ====================  srv  end  ====================";
const PROC_START: &str = "[sys] -------------------- proc start --------------------";
const PROC_END: &str = "[sys] --------------------  proc end  --------------------";

/// A unit whose process the engine spawns, watches and respawns itself.
pub struct OwnedUnit {
    inner: Arc<Inner>,
}

struct Inner {
    service: ServiceConfig,
    options: UnitOptions,
    schedule: Option<RestartSchedule>,
    state: StateCell,
    /// Guards spawning as well as the child's stdin.
    stdin: Mutex<Option<ChildStdin>>,
    sink: Arc<dyn LogSink>,
    tree: Arc<dyn ProcessTree>,
    attempts: AtomicU32,
    restarts: AtomicU64,
    last_error: Mutex<Option<String>>,
    stop_failure: watch::Sender<Option<String>>,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Clears the per-iteration process state on every exit path, unwinding
/// included.
struct IterationGuard<'a>(&'a Inner);

impl Drop for IterationGuard<'_> {
    fn drop(&mut self) {
        self.0.stdin.lock().take();
        self.0.state.clear_process();
        self.0.log(PROC_END);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `fut` on its own task so a panic inside it surfaces as
/// `Error::RuntimeCrash` instead of unwinding into the caller.
pub(crate) async fn isolate<F>(name: &str, sink: &dyn LogSink, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                e.to_string()
            };
            error!(unit = %name, "Run iteration crashed: {}", message);
            let _ = sink.write_line(&format!("[panic] crashed with error - {}", message));
            Err(Error::RuntimeCrash {
                name: name.to_string(),
                message,
            })
        }
    }
}

/// Waits for the unit to leave Stopping. A recorded stop failure wins over
/// the state change and is reported the same way whichever is seen first.
pub(crate) async fn until_settled(
    name: &str,
    state: &StateCell,
    stop_failure: &watch::Sender<Option<String>>,
) -> Result<()> {
    let failed = |reason: String| -> Result<()> {
        Err(Error::Other(anyhow::anyhow!(
            "stop '{}' failed, {}",
            name,
            reason
        )))
    };
    let mut failures = stop_failure.subscribe();
    let reported = async move {
        failures
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|failure| failure.clone())
    };

    tokio::select! {
        biased;
        _ = state.wait_service(|s| s != ServiceState::Stopping) => {
            let recorded = stop_failure.borrow().clone();
            match recorded {
                Some(reason) => failed(reason),
                None => Ok(()),
            }
        }
        Some(reason) = reported => failed(reason),
    }
}

impl OwnedUnit {
    pub fn new(
        service: ServiceConfig,
        options: UnitOptions,
        sink: Arc<dyn LogSink>,
        tree: Arc<dyn ProcessTree>,
    ) -> Result<Self> {
        service.validate()?;
        let schedule = service
            .restart_schedule
            .as_deref()
            .map(RestartSchedule::parse)
            .transpose()?;
        let (stop_failure, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                service,
                options,
                schedule,
                state: StateCell::new(),
                stdin: Mutex::new(None),
                sink,
                tree,
                attempts: AtomicU32::new(0),
                restarts: AtomicU64::new(0),
                last_error: Mutex::new(None),
                stop_failure,
            }),
        })
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

    fn record_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    fn uses_console(&self) -> bool {
        self.service
            .stop
            .as_ref()
            .is_some_and(|stop| stop.strategy() == StopStrategy::Console)
    }

    fn mark_running(&self) {
        if self
            .state
            .compare_and_swap(ServiceState::Starting, ServiceState::Running)
        {
            info!(unit = %self.name(), "Service is running");
        }
    }

    async fn control_loop(self: Arc<Self>) {
        loop {
            let inner = self.clone();
            let run = isolate(self.name(), self.sink.as_ref(), async move {
                inner.run_service().await;
                Ok(())
            });
            if let Err(e) = run.await {
                self.record_error(e.to_string());
                self.state.clear_process();
                self.log(SRV_END);
            }
            if !self.state.settle() {
                break;
            }
            debug!(unit = %self.name(), "Starting again after stop");
        }
    }

    async fn run_service(self: &Arc<Self>) {
        self.log(SRV_START);
        self.attempts.store(0, Ordering::Relaxed);
        *self.last_error.lock() = None;

        let _job = self.schedule.clone().map(|schedule| {
            self.log(&format!("[sys] restart schedule '{}'", schedule.expr()));
            let inner = self.clone();
            AbortOnDrop(schedule.spawn(self.name().to_string(), move || {
                let inner = inner.clone();
                async move { inner.scheduled_restart().await }
            }))
        });

        for attempt in 1..=self.service.retries {
            if self.state.service() != ServiceState::Starting {
                break;
            }
            self.attempts.store(attempt, Ordering::Relaxed);
            if let Err(e) = self.iteration(true).await {
                self.record_error(e.to_string());
            }

            let current = self.state.service();
            if current != ServiceState::Starting {
                break;
            }
            self.log(&format!("[sys] current status is '{}'", current));
        }

        if self.state.service() == ServiceState::Starting {
            let reason = match self.last_error.lock().take() {
                Some(last) => format!(
                    "gave up after {} attempts, {}",
                    self.service.retries, last
                ),
                None => format!("gave up after {} attempts", self.service.retries),
            };
            warn!(unit = %self.name(), "Start failed: {}", reason);
            self.log(&format!("[sys] start failed, {}", reason));
            self.record_error(reason);
        }

        while self.state.service() == ServiceState::Running {
            let interrupted = tokio::select! {
                _ = tokio::time::sleep(self.options.respawn_interval) => false,
                _ = self.state.wait_service(|s| s != ServiceState::Running) => true,
            };
            if interrupted {
                break;
            }

            let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
            info!(unit = %self.name(), restarts, "Respawning process");
            if let Err(e) = self.iteration(false).await {
                self.record_error(e.to_string());
            }
        }

        self.log(SRV_END);
    }

    async fn iteration(self: &Arc<Self>, detect: bool) -> Result<()> {
        let inner = self.clone();
        isolate(self.name(), self.sink.as_ref(), async move {
            inner.run_once(detect).await
        })
        .await
    }

    /// Launches the process once and waits for it to go away. With `detect`
    /// the unit moves to Running on the success marker, or on spawn when no
    /// marker is configured.
    async fn run_once(self: Arc<Self>, detect: bool) -> Result<()> {
        let _guard = IterationGuard(self.as_ref());
        let active = |s: ServiceState| matches!(s, ServiceState::Starting | ServiceState::Running);
        if !active(self.state.service()) {
            return Ok(());
        }

        self.log(PROC_START);
        self.state.set_process(ProcessState::Launching);
        for line in self.service.start.describe() {
            self.log(&line);
        }

        let mut cmd = self.service.start.to_process(&self.options.run_mode);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.uses_console() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let (mut child, pid) = {
            let mut stdin = self.stdin.lock();
            if !active(self.state.service()) {
                return Ok(());
            }
            let mut child = cmd.spawn().map_err(|e| {
                self.log(&format!("[sys] start process failed - {}", e));
                Error::SpawnFailed(format!("{}: {}", self.service.start.executable(), e))
            })?;
            let pid = child.id().ok_or_else(|| {
                Error::SpawnFailed("process exited before its pid was read".to_string())
            })?;
            self.state.set_launched(pid);
            *stdin = child.stdin.take();
            (child, pid)
        };
        debug!(unit = %self.name(), pid, "Process launched");

        let matcher = match (&self.service.success_flag, detect) {
            (Some(flag), true) => Some(Arc::new(Mutex::new(StreamMatcher::new(
                flag,
                Some(self.sink.clone()),
            )))),
            _ => None,
        };
        if detect && matcher.is_none() {
            self.mark_running();
        }

        let mut relays = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let inner = self.clone();
            relays.push(spawn_relay(stdout, self.sink.clone(), matcher.clone(), move || {
                inner.mark_running()
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let inner = self.clone();
            relays.push(spawn_relay(stderr, self.sink.clone(), matcher.clone(), move || {
                inner.mark_running()
            }));
        }

        let mut ticker = tokio::time::interval(self.options.liveness_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        let status = loop {
            tokio::select! {
                status = child.wait() => break Some(status),
                _ = ticker.tick() => {
                    if !self.tree.is_alive(pid) {
                        self.stdin.lock().take();
                        self.log(&format!("[sys] process pid('{}') is not found.", pid));
                        break None;
                    }
                }
            }
        };
        self.state.set_process(ProcessState::Exiting);

        drain(relays).await;

        let exit = match status {
            Some(Ok(status)) => {
                let status = ExitStatus::from_std(status);
                self.log(&format!("[sys] process is exited ({}).", status));
                status.to_string()
            }
            Some(Err(e)) => {
                self.log(&format!("[sys] wait process failed - {}", e));
                return Err(e.into());
            }
            None => "not found".to_string(),
        };

        if detect
            && let Some(flag) = &self.service.success_flag
            && self.state.service() == ServiceState::Starting
        {
            return Err(Error::StartFailure {
                name: self.name().to_string(),
                reason: format!("process exited ({}) before '{}' appeared", exit, flag),
            });
        }
        Ok(())
    }

    /// Stops the tracked process without changing the service state.
    async fn interrupt(&self) -> Result<()> {
        let (pid, stdin) = {
            let mut stdin = self.stdin.lock();
            let pid = self.state.pid();
            let stdin = if self.uses_console() { stdin.take() } else { None };
            (pid, stdin)
        };
        let Some(pid) = pid else {
            self.log("[sys] pid = 0");
            return Ok(());
        };

        let waiter = TrackedExit(&self.state);
        Termination {
            name: self.name(),
            stop: self.service.stop.as_ref(),
            kill_timeout: self.service.kill_timeout,
            mode: &self.options.run_mode,
            tree: self.tree.as_ref(),
            sink: self.sink.as_ref(),
            waiter: &waiter,
        }
        .run(pid, stdin)
        .await
    }

    async fn scheduled_restart(&self) {
        if self.state.service() != ServiceState::Running {
            return;
        }
        info!(unit = %self.name(), "Scheduled restart");
        self.log("[sys] scheduled restart");
        if let Err(e) = self.interrupt().await {
            warn!(unit = %self.name(), "Scheduled restart failed: {}", e);
        }
    }
}

#[async_trait]
impl SupervisionUnit for OwnedUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn mode(&self) -> &str {
        &self.inner.service.mode
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Owned
    }

    fn start(&self) {
        match self.inner.state.request_start() {
            StartRequest::Launch => {
                self.inner.stop_failure.send_replace(None);
                tokio::spawn(self.inner.clone().control_loop());
            }
            StartRequest::Queued => {
                debug!(unit = %self.name(), "Start queued behind stop");
            }
            StartRequest::Ignored => {
                debug!(unit = %self.name(), "Already started");
            }
        }
    }

    fn stop(&self) {
        let state = &self.inner.state;
        if !state.compare_and_swap(ServiceState::Running, ServiceState::Stopping)
            && !state.compare_and_swap(ServiceState::Starting, ServiceState::Stopping)
        {
            return;
        }
        self.inner
            .log(&format!("[sys] switch to '{}'", ServiceState::Stopping));
        self.inner.stop_failure.send_replace(None);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.interrupt().await {
                inner.stop_failure.send_replace(Some(e.to_string()));
            }
        });
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
        Err(Error::StartFailure {
            name: self.name().to_string(),
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
        let service = &self.inner.service;
        UnitStatus {
            name: service.name.clone(),
            kind: UnitKind::Owned,
            pid: phase.pid,
            retries: service.retries,
            restarts: self.inner.restarts.load(Ordering::Relaxed),
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            kill_timeout_ms: service.kill_timeout.as_millis() as u64,
            owned: true,
            state: phase.service.as_str().to_string(),
            srv_status: phase.service.as_str().to_string(),
            proc_status: phase.process.as_str().to_string(),
            success_marker: service.success_flag.clone(),
            pidfile: None,
            mode: service.mode.clone(),
            skipped: false,
            protected: false,
            last_error: self.inner.last_error.lock().clone(),
        }
    }
}
