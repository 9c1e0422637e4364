pub mod command;
pub mod config;
pub mod error;
pub mod matcher;
pub mod process;
pub mod sink;
pub mod state;
pub mod unit;

pub use command::{Command, StopStrategy};
pub use config::{Config, DaemonConfig, ServiceConfig};
pub use error::{Error, Result};
pub use matcher::StreamMatcher;
pub use process::{ExitStatus, ProcessEntry, ProcessTree, StopSignal};
pub use sink::{LogSink, MemorySink, StdoutSink};
pub use state::{Phase, ProcessState, ServiceState, StartRequest, StateCell};
pub use unit::{EXTERN_RUNNING, SupervisionUnit, UnitKind, UnitStatus};
