mod error;
pub mod gate;
pub mod health;
mod process_manager;
mod status;
mod supervisor;
mod topology;
mod types;

pub use error::{Error, Result};
pub use gate::Blocker;
pub use health::{HealthProbe, HealthTracker, ProbeOutcome, SystemProbe};
pub use process_manager::{
    BoxStream, CommandSpec, ExitStatus, ExitWatch, ProcId, ProcessManager, Spawned,
    UnixProcessManager,
};
pub use status::{ServiceReport, StatusReport, StatusSnapshot, StatusTable};
pub use supervisor::{Supervisor, SupervisorEvent};
pub use topology::start_order;
pub use types::{ServiceState, ServiceStatus};
