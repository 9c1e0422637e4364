use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One row of a process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub exe: String,
}

/// Platform capability for enumerating and killing OS processes.
///
/// Implementations may serve `list` from a periodically refreshed snapshot;
/// `is_alive` must answer from a live query whenever one is possible.
pub trait ProcessTree: Send + Sync {
    fn list(&self) -> crate::Result<Vec<ProcessEntry>>;

    fn kill_one(&self, pid: u32) -> crate::Result<()>;

    fn is_alive(&self, pid: u32) -> bool;
}

/// Signals accepted by the `__signal__` stop strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Kill,
    Interrupt,
}

impl StopSignal {
    #[cfg(unix)]
    pub fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal as NixSignal;
        match self {
            StopSignal::Kill => NixSignal::SIGKILL,
            StopSignal::Interrupt => NixSignal::SIGINT,
        }
    }
}

impl FromStr for StopSignal {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kill" => Ok(StopSignal::Kill),
            "int" => Ok(StopSignal::Interrupt),
            other => Err(crate::Error::Signal(format!(
                "unsupported signal '{}', expected kill or int",
                other
            ))),
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Kill => write!(f, "kill"),
            StopSignal::Interrupt => write!(f, "int"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
            #[cfg(not(unix))]
            signal: None,
        }
    }

    pub fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self { code, signal }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {}", code),
            (None, Some(sig)) => write!(f, "signal {}", sig),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}
