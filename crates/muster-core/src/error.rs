use crate::process_manager::ProcId;

pub type Result<R, E = Error> = std::result::Result<R, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("unknown process id {0:?}")]
    UnknownProcess(ProcId),
    #[error("service `{0}` not found")]
    ServiceNotFound(String),
    #[error("circular dependency detected")]
    CircularDependencyDetected,
    #[error("supervisor is not running")]
    ChannelClosed,
}
