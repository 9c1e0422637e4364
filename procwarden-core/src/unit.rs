use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::state::{Phase, ServiceState};

/// Status string reported for a running process the engine did not launch.
pub const EXTERN_RUNNING: &str = "running, extern";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Owned,
    Adopted,
}

/// Serializable snapshot of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub kind: UnitKind,
    pub pid: Option<u32>,
    pub retries: u32,
    pub restarts: u64,
    pub attempts: u32,
    pub kill_timeout_ms: u64,
    pub owned: bool,
    pub state: String,
    pub srv_status: String,
    pub proc_status: String,
    pub success_marker: Option<String>,
    pub pidfile: Option<PathBuf>,
    pub mode: String,
    pub skipped: bool,
    pub protected: bool,
    pub last_error: Option<String>,
}

impl UnitStatus {
    pub fn is_running(&self) -> bool {
        self.srv_status == ServiceState::Running.as_str()
    }
}

/// Per-service control loop and state machine.
///
/// `start` and `stop` only signal; the `until_*` methods await the outcome.
#[async_trait]
pub trait SupervisionUnit: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> &str;

    fn kind(&self) -> UnitKind;

    fn start(&self);

    fn stop(&self);

    /// Resolves once the unit is Running, or with its start error once it
    /// settles back to Idle.
    async fn until_started(&self) -> crate::Result<()>;

    /// Resolves once an in-flight stop has settled.
    async fn until_stopped(&self) -> crate::Result<()>;

    fn phase(&self) -> Phase;

    fn status(&self) -> UnitStatus;

    async fn restart(&self) -> crate::Result<()> {
        self.stop();
        self.until_stopped().await?;
        self.start();
        self.until_started().await
    }
}
