use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Desired, top-level lifecycle of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Idle => "SRV_INIT",
            ServiceState::Starting => "SRV_STARTING",
            ServiceState::Running => "SRV_RUNNING",
            ServiceState::Stopping => "SRV_STOPPING",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the concrete OS process within one run iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Idle,
    Launching,
    Alive,
    Exiting,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Idle => "PROC_INIT",
            ProcessState::Launching => "PROC_STARTING",
            ProcessState::Alive => "PROC_RUNNING",
            ProcessState::Exiting => "PROC_STOPPING",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of both state axes plus the tracked pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub service: ServiceState,
    pub process: ProcessState,
    pub pid: Option<u32>,
    /// A start requested while stopping, applied when the stop settles.
    pub queued: bool,
}

impl Default for Phase {
    fn default() -> Self {
        Self {
            service: ServiceState::Idle,
            process: ProcessState::Idle,
            pid: None,
            queued: false,
        }
    }
}

/// Outcome of [`StateCell::request_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRequest {
    /// Idle moved to Starting; the caller must launch the control loop.
    Launch,
    /// The unit is stopping; it moves to Starting once the stop settles.
    Queued,
    /// Already starting or running.
    Ignored,
}

/// Linearized state holder for one unit.
///
/// Every mutation goes through the watch channel, so a waiter that subscribed
/// before a transition always observes it.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<Phase>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Phase::default());
        Self { tx }
    }

    pub fn get(&self) -> Phase {
        *self.tx.borrow()
    }

    pub fn service(&self) -> ServiceState {
        self.tx.borrow().service
    }

    pub fn process(&self) -> ProcessState {
        self.tx.borrow().process
    }

    pub fn pid(&self) -> Option<u32> {
        self.tx.borrow().pid
    }

    /// Moves the service state from `from` to `to`. Returns false, leaving
    /// the state untouched, when the current state is not `from`.
    pub fn compare_and_swap(&self, from: ServiceState, to: ServiceState) -> bool {
        self.tx.send_if_modified(|phase| {
            if phase.service == from {
                phase.service = to;
                true
            } else {
                false
            }
        })
    }

    pub fn request_start(&self) -> StartRequest {
        let mut outcome = StartRequest::Ignored;
        self.tx.send_if_modified(|phase| match phase.service {
            ServiceState::Idle => {
                phase.service = ServiceState::Starting;
                outcome = StartRequest::Launch;
                true
            }
            ServiceState::Stopping => {
                outcome = StartRequest::Queued;
                let changed = !phase.queued;
                phase.queued = true;
                changed
            }
            ServiceState::Starting | ServiceState::Running => false,
        });
        outcome
    }

    /// Ends a run of the unit. A queued start turns into Starting and
    /// true is returned, otherwise the unit becomes Idle.
    pub fn settle(&self) -> bool {
        let mut relaunch = false;
        self.tx.send_modify(|phase| {
            if phase.queued {
                phase.queued = false;
                phase.service = ServiceState::Starting;
                relaunch = true;
            } else {
                phase.service = ServiceState::Idle;
            }
        });
        relaunch
    }

    /// Unconditionally sets the service state, returning the previous one.
    pub fn set_service(&self, to: ServiceState) -> ServiceState {
        let mut previous = to;
        self.tx.send_if_modified(|phase| {
            previous = phase.service;
            if phase.service != to {
                phase.service = to;
                true
            } else {
                false
            }
        });
        previous
    }

    pub fn set_process(&self, to: ProcessState) {
        self.tx.send_if_modified(|phase| {
            if phase.process != to {
                phase.process = to;
                true
            } else {
                false
            }
        });
    }

    pub fn set_launched(&self, pid: u32) {
        self.tx.send_modify(|phase| {
            phase.pid = Some(pid);
            phase.process = ProcessState::Alive;
        });
    }

    /// Clears the pid and returns the process axis to `Idle`.
    pub fn clear_process(&self) {
        self.tx.send_if_modified(|phase| {
            if phase.pid.is_some() || phase.process != ProcessState::Idle {
                phase.pid = None;
                phase.process = ProcessState::Idle;
                true
            } else {
                false
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }

    /// Resolves with the first phase satisfying `pred`, including the current one.
    pub async fn wait_for<F>(&self, mut pred: F) -> Phase
    where
        F: FnMut(&Phase) -> bool,
    {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|phase| pred(phase)).await {
            Ok(phase) => *phase,
            // The sender is owned by `self`.
            Err(_) => self.get(),
        }
    }

    pub async fn wait_service<F>(&self, mut pred: F) -> ServiceState
    where
        F: FnMut(ServiceState) -> bool,
    {
        self.wait_for(|phase| pred(phase.service)).await.service
    }
}
