use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::command::{CONSOLE_SENTINEL, Command};

pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);
pub const MIN_LOG_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_LOG_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_LOG_FILES: u32 = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonConfig {
    pub mode: String,
    pub root_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_max_bytes: u64,
    pub log_max_files: u32,
    pub log_level: String,
    pub print: bool,
    pub pre_start: String,
    pub post_finish: String,
    pub socket_path: PathBuf,
    pub respawn_interval: Duration,
    pub liveness_interval: Duration,
    pub process_refresh: Duration,
    pub pidfile_poll_attempts: u32,
    pub pidfile_poll_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mode: String::new(),
            root_dir: PathBuf::from("."),
            log_dir: PathBuf::from("logs"),
            log_max_bytes: DEFAULT_LOG_BYTES,
            log_max_files: DEFAULT_LOG_FILES,
            log_level: "info".to_string(),
            print: false,
            pre_start: "pre_start".to_string(),
            post_finish: "post_finish".to_string(),
            socket_path: PathBuf::from("/tmp/procwarden.sock"),
            respawn_interval: Duration::from_secs(2),
            liveness_interval: Duration::from_secs(60),
            process_refresh: Duration::from_secs(300),
            pidfile_poll_attempts: 10,
            pidfile_poll_interval: Duration::from_secs(1),
        }
    }
}

impl DaemonConfig {
    /// Directory holding per-unit logs, resolved against `root_dir`.
    pub fn log_path(&self) -> PathBuf {
        self.root_dir.join(&self.log_dir)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub start: Command,
    pub stop: Option<Command>,
    pub success_flag: Option<String>,
    pub retries: u32,
    pub kill_timeout: Duration,
    pub mode: String,
    pub pidfile: Option<PathBuf>,
    pub restart_schedule: Option<String>,
    pub disabled: bool,
    pub protected: bool,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, start: Command) -> Self {
        Self {
            name: name.into(),
            start,
            stop: None,
            success_flag: None,
            retries: DEFAULT_RETRIES,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            mode: String::new(),
            pidfile: None,
            restart_schedule: None,
            disabled: false,
            protected: false,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::Config("service name is missing".to_string()));
        }
        if self.start.executable().trim().is_empty() {
            return Err(crate::Error::Config(format!(
                "'{}' has no start command",
                self.name
            )));
        }
        if self.retries == 0 {
            return Err(crate::Error::Config(format!(
                "'{}' retries must be greater than zero",
                self.name
            )));
        }
        if self.kill_timeout.is_zero() {
            return Err(crate::Error::Config(format!(
                "'{}' kill timeout must be greater than zero",
                self.name
            )));
        }
        if self.pidfile.is_some()
            && let Some(stop) = &self.stop
            && stop.executable() == CONSOLE_SENTINEL
        {
            return Err(crate::Error::Config(format!(
                "'{}' has a pidfile, its stop command cannot be {}",
                self.name, CONSOLE_SENTINEL
            )));
        }
        Ok(())
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            crate::Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        let raw: ConfigRaw = serde_json::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        let config = Config::from(raw);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "service '{}' is defined more than once",
                    service.name
                )));
            }
        }
        Ok(())
    }
}

// Raw deserialization structs

#[derive(Debug, Deserialize)]
struct ConfigRaw {
    #[serde(default)]
    daemon: DaemonConfigRaw,
    #[serde(default)]
    services: Vec<ServiceConfigRaw>,
}

#[derive(Debug, Default, Deserialize)]
struct DaemonConfigRaw {
    mode: Option<String>,
    root_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    log_max_bytes: Option<u64>,
    log_max_files: Option<i64>,
    log_level: Option<String>,
    print: Option<bool>,
    pre_start: Option<String>,
    post_finish: Option<String>,
    socket_path: Option<PathBuf>,
    respawn_interval_ms: Option<u64>,
    liveness_interval_ms: Option<u64>,
    process_refresh_secs: Option<u64>,
    pidfile_poll_attempts: Option<u32>,
    pidfile_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfigRaw {
    #[serde(default)]
    name: String,
    start: Option<CommandRaw>,
    stop: Option<CommandRaw>,
    success_flag: Option<String>,
    retries: Option<u32>,
    kill_timeout_ms: Option<u64>,
    mode: Option<String>,
    pidfile: Option<PathBuf>,
    restart_schedule: Option<String>,
    disabled: Option<bool>,
    protected: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CommandRaw {
    #[serde(default)]
    execute: String,
    arguments: Option<Vec<String>>,
    environments: Option<EnvironmentsRaw>,
    directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvironmentsRaw {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

impl EnvironmentsRaw {
    fn into_pairs(self) -> Vec<(String, String)> {
        match self {
            EnvironmentsRaw::Map(map) => map.into_iter().collect(),
            EnvironmentsRaw::List(list) => list
                .into_iter()
                .filter_map(|entry| {
                    entry
                        .split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect(),
        }
    }
}

impl CommandRaw {
    fn into_command(self, root_dir: &Path) -> Command {
        let mut command = Command::new(self.execute)
            .args(self.arguments.unwrap_or_default())
            .envs(
                self.environments
                    .map(EnvironmentsRaw::into_pairs)
                    .unwrap_or_default(),
            );
        if let Some(dir) = self.directory {
            command = command.current_dir(root_dir.join(dir));
        }
        command
    }
}

impl From<DaemonConfigRaw> for DaemonConfig {
    fn from(raw: DaemonConfigRaw) -> Self {
        let defaults = DaemonConfig::default();

        let log_max_bytes = match raw.log_max_bytes {
            Some(bytes) if bytes >= MIN_LOG_BYTES => bytes,
            _ => DEFAULT_LOG_BYTES,
        };
        let log_max_files = match raw.log_max_files {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => DEFAULT_LOG_FILES,
        };

        DaemonConfig {
            mode: raw.mode.unwrap_or(defaults.mode),
            root_dir: raw.root_dir.unwrap_or(defaults.root_dir),
            log_dir: raw.log_dir.unwrap_or(defaults.log_dir),
            log_max_bytes,
            log_max_files,
            log_level: raw.log_level.unwrap_or(defaults.log_level),
            print: raw.print.unwrap_or(defaults.print),
            pre_start: raw.pre_start.unwrap_or(defaults.pre_start),
            post_finish: raw.post_finish.unwrap_or(defaults.post_finish),
            socket_path: raw.socket_path.unwrap_or(defaults.socket_path),
            respawn_interval: raw
                .respawn_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.respawn_interval),
            liveness_interval: raw
                .liveness_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.liveness_interval),
            process_refresh: raw
                .process_refresh_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.process_refresh),
            pidfile_poll_attempts: raw
                .pidfile_poll_attempts
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pidfile_poll_attempts),
            pidfile_poll_interval: raw
                .pidfile_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.pidfile_poll_interval),
        }
    }
}

impl From<ConfigRaw> for Config {
    fn from(raw: ConfigRaw) -> Self {
        let daemon = DaemonConfig::from(raw.daemon);
        let root_dir = daemon.root_dir.clone();

        let services = raw
            .services
            .into_iter()
            .map(|s| {
                if s.retries.is_some() && s.success_flag.is_none() {
                    tracing::warn!(
                        "'{}' sets retries without a success_flag, the first spawn counts as started",
                        s.name
                    );
                }

                ServiceConfig {
                    start: s
                        .start
                        .map(|c| c.into_command(&root_dir))
                        .unwrap_or_else(|| Command::new("")),
                    stop: s.stop.map(|c| c.into_command(&root_dir)),
                    success_flag: s.success_flag.filter(|flag| !flag.is_empty()),
                    retries: s.retries.unwrap_or(DEFAULT_RETRIES),
                    kill_timeout: s
                        .kill_timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(DEFAULT_KILL_TIMEOUT),
                    mode: s.mode.unwrap_or_default(),
                    pidfile: s.pidfile.map(|p| root_dir.join(p)),
                    restart_schedule: s.restart_schedule.filter(|expr| !expr.trim().is_empty()),
                    disabled: s.disabled.unwrap_or(false),
                    protected: s.protected.unwrap_or(false),
                    name: s.name,
                }
            })
            .collect();

        Config { daemon, services }
    }
}
