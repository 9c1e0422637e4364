use async_trait::async_trait;
use procwarden_core::{
    Command, Error, LogSink, ProcessTree, Result, StateCell, StopSignal, StopStrategy,
};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tracing::{debug, warn};

use crate::platform;
use crate::process_tree::kill_tree;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Waits for a tracked pid to go away.
#[async_trait]
pub trait ExitWaiter: Send + Sync {
    /// `false` when `pid` is still alive after `timeout`.
    async fn wait_exit(&self, pid: u32, timeout: Duration) -> bool;
}

/// Exit waiter for processes the unit reaps itself: the control loop clears
/// the tracked pid once the child has been waited on.
pub struct TrackedExit<'a>(pub &'a StateCell);

#[async_trait]
impl ExitWaiter for TrackedExit<'_> {
    async fn wait_exit(&self, pid: u32, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.0.wait_for(|phase| phase.pid != Some(pid)))
            .await
            .is_ok()
    }
}

/// Exit waiter for processes owned by someone else, polled through the
/// process table.
pub struct PolledExit<'a>(pub &'a dyn ProcessTree);

#[async_trait]
impl ExitWaiter for PolledExit<'_> {
    async fn wait_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.0.is_alive(pid) {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        true
    }
}

/// Everything the dispatcher needs to stop one unit's process.
pub struct Termination<'a> {
    pub name: &'a str,
    pub stop: Option<&'a Command>,
    pub kill_timeout: Duration,
    pub mode: &'a str,
    pub tree: &'a dyn ProcessTree,
    pub sink: &'a dyn LogSink,
    pub waiter: &'a dyn ExitWaiter,
}

impl Termination<'_> {
    fn log(&self, line: &str) {
        if let Err(e) = self.sink.write_line(line) {
            debug!(unit = %self.name, "Dropped log line: {}", e);
        }
    }

    /// Stops `pid` with the configured strategy, falling back to killing the
    /// whole process tree. Only a failed force-kill is returned as an error.
    pub async fn run(&self, pid: u32, stdin: Option<ChildStdin>) -> Result<()> {
        let strategy = self
            .stop
            .map(Command::strategy)
            .unwrap_or(StopStrategy::ForceKill);

        let outcome = match strategy {
            StopStrategy::ForceKill => None,
            StopStrategy::Signal => Some(self.by_signal(pid).await),
            StopStrategy::Console => Some(self.by_console(pid, stdin).await),
            StopStrategy::Exec => Some(self.by_command(pid).await),
        };

        match outcome {
            Some(Ok(())) => {
                self.log(&format!("[stop] process {} exited", pid));
                return Ok(());
            }
            Some(Err(e)) => {
                debug!(unit = %self.name, pid, "Stop strategy failed: {}", e);
                self.log(&format!("[stop] {}", e));
            }
            None => {}
        }

        self.force_kill(pid)
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        match kill_tree(self.tree, pid) {
            Ok(killed) => {
                debug!(unit = %self.name, "Killed process tree {:?}", killed);
                self.log("[kill] kill process when exit");
                Ok(())
            }
            Err(e) => {
                warn!(unit = %self.name, pid, "Force kill failed: {}", e);
                self.log(&format!("[kill] {}", e));
                Err(e)
            }
        }
    }

    fn timed_out(&self) -> Error {
        Error::StopTimeout {
            name: self.name.to_string(),
            timeout: self.kill_timeout,
        }
    }

    async fn wait_exit(&self, pid: u32, budget: Duration) -> Result<()> {
        if self.waiter.wait_exit(pid, budget).await {
            Ok(())
        } else {
            Err(self.timed_out())
        }
    }

    fn arguments(&self) -> &[String] {
        self.stop.map(Command::arguments).unwrap_or_default()
    }

    async fn by_signal(&self, pid: u32) -> Result<()> {
        let name = self
            .arguments()
            .first()
            .ok_or_else(|| Error::Signal("signal is empty".to_string()))?;
        let sig: StopSignal = name.parse()?;

        platform::send_signal(pid, sig)?;
        self.wait_exit(pid, self.kill_timeout).await
    }

    async fn by_console(&self, pid: u32, stdin: Option<ChildStdin>) -> Result<()> {
        let lines = self.arguments();
        if lines.is_empty() {
            return Err(Error::Other(anyhow::anyhow!("console arguments is empty")));
        }
        let mut stdin =
            stdin.ok_or_else(|| Error::Other(anyhow::anyhow!("stdin is not redirected")))?;

        for line in lines {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\r\n").await?;
        }
        stdin.flush().await?;
        drop(stdin);

        self.wait_exit(pid, self.kill_timeout).await
    }

    async fn by_command(&self, pid: u32) -> Result<()> {
        let Some(stop) = self.stop else {
            return Err(Error::Other(anyhow::anyhow!("stop command is missing")));
        };

        let started = Instant::now();
        let mut cmd = stop.to_process(self.mode);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.kill_timeout, cmd.output())
            .await
            .map_err(|_| self.timed_out())??;

        for stream in [&output.stdout, &output.stderr] {
            if !stream.is_empty() {
                let _ = self.sink.write(bytes::Bytes::copy_from_slice(stream));
            }
        }

        if !output.status.success() {
            return Err(Error::Other(anyhow::anyhow!(
                "stop command exited with {}",
                procwarden_core::ExitStatus::from_std(output.status)
            )));
        }

        let used = started.elapsed();
        if used >= self.kill_timeout {
            return Err(self.timed_out());
        }

        self.wait_exit(pid, self.kill_timeout - used).await
    }
}
