use serde::Serialize;
use std::path::{Path, PathBuf};

/// Stop-command executable that skips straight to force-kill.
pub const KILL_SENTINEL: &str = "__kill__";
/// Stop-command executable that sends the signal named by the first argument.
pub const SIGNAL_SENTINEL: &str = "__signal__";
/// Stop-command executable that writes its arguments to the child's stdin.
pub const CONSOLE_SENTINEL: &str = "__console__";
/// Environment variable carrying the active run mode into every child.
pub const RUN_MODE_ENV: &str = "DAEMON_RUN_MODE";

/// How a stop command terminates the tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStrategy {
    ForceKill,
    Signal,
    Console,
    Exec,
}

/// An immutable executable invocation: program, arguments, environment
/// overrides and working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    executable: String,
    arguments: Vec<String>,
    environment: Vec<(String, String)>,
    directory: Option<PathBuf>,
}

impl Command {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            arguments: Vec::new(),
            environment: Vec::new(),
            directory: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.arguments = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn env<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.environment
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (k, v) in vars {
            self.environment
                .push((k.as_ref().to_string(), v.as_ref().to_string()));
        }
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn strategy(&self) -> StopStrategy {
        match self.executable.as_str() {
            "" | KILL_SENTINEL => StopStrategy::ForceKill,
            SIGNAL_SENTINEL => StopStrategy::Signal,
            CONSOLE_SENTINEL => StopStrategy::Console,
            _ => StopStrategy::Exec,
        }
    }

    /// Program and argument vector actually executed. An executable string
    /// with embedded spaces and no explicit arguments is split shell-style.
    pub fn argv(&self) -> (String, Vec<String>) {
        if self.executable.contains(' ') && self.arguments.is_empty() {
            match shell_words::split(&self.executable) {
                Ok(parts) => {
                    let mut parts = parts.into_iter();
                    if let Some(program) = parts.next() {
                        return (program, parts.collect());
                    }
                }
                Err(e) => {
                    tracing::debug!("Could not split command '{}': {}", self.executable, e);
                }
            }
        }
        (self.executable.clone(), self.arguments.clone())
    }

    /// Builds the OS command: the parent's environment plus the overrides,
    /// and `DAEMON_RUN_MODE` when a mode is active. Stdio is left to the caller.
    pub fn to_process(&self, mode: &str) -> tokio::process::Command {
        let (program, args) = self.argv();
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);

        if let Some(dir) = &self.directory
            && !dir.as_os_str().is_empty()
        {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.environment {
            cmd.env(key, value);
        }

        if !mode.is_empty() {
            cmd.env(RUN_MODE_ENV, mode);
        }

        cmd
    }

    /// The lines echoed to a unit log before launching.
    pub fn describe(&self) -> Vec<String> {
        let (program, args) = self.argv();
        let mut lines = Vec::with_capacity(args.len() + 1);
        lines.push(format!("[sys] {}", program));
        lines.extend(args.iter().map(|a| format!("[sys] \t\t{}", a)));
        lines
    }
}
