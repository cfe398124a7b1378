mod base;
mod implementations;
mod types;

pub use base::ProcessManager;
#[cfg(test)]
pub use implementations::MockProcessManager;
pub use implementations::UnixProcessManager;
pub use types::{BoxStream, CommandSpec, ExitStatus, ExitWatch, ProcId, Spawned};
