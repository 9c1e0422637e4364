use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use procwarden_core::{Error, Result, StopSignal};

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| Error::Signal(format!("PID {} too large for system", pid)))
}

pub fn send_signal(pid: u32, sig: StopSignal) -> Result<()> {
    signal::kill(to_pid(pid)?, sig.to_nix())?;
    Ok(())
}

/// SIGKILL a single pid. A pid that is already gone is not an error.
pub fn kill_pid(pid: u32) -> Result<()> {
    match signal::kill(to_pid(pid)?, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Live existence check. `None` when the answer is inconclusive.
pub fn probe(pid: u32) -> Option<bool> {
    let pid = to_pid(pid).ok()?;
    match signal::kill(pid, None::<Signal>) {
        Ok(()) | Err(Errno::EPERM) => Some(true),
        Err(Errno::ESRCH) => Some(false),
        Err(_) => None,
    }
}
