use procwarden_core::{Error, Result, StopSignal};
use sysinfo::{Pid, ProcessesToUpdate, System};

fn refreshed(pid: u32) -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system
}

pub fn send_signal(pid: u32, sig: StopSignal) -> Result<()> {
    match sig {
        StopSignal::Kill => kill_pid(pid),
        StopSignal::Interrupt => Err(Error::Signal(format!(
            "Signal {} not supported on Windows",
            sig
        ))),
    }
}

pub fn kill_pid(pid: u32) -> Result<()> {
    let system = refreshed(pid);
    match system.process(Pid::from_u32(pid)) {
        Some(process) if !process.kill() => Err(Error::Signal(format!(
            "Failed to terminate process {}",
            pid
        ))),
        _ => Ok(()),
    }
}

pub fn probe(pid: u32) -> Option<bool> {
    Some(refreshed(pid).process(Pid::from_u32(pid)).is_some())
}
