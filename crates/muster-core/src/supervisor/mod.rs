mod background;
mod commands;
mod main;

pub(crate) use commands::SupervisorCommand;
pub use commands::SupervisorEvent;
pub use main::Supervisor;
