use quasar_jdwp::{ThreadId, VmError};
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("no active debug session")]
    NoSession,
    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),
    #[error("cannot parse {text:?} as {type_name}")]
    Parse { type_name: String, text: String },
    #[error("failed to start target: {0}")]
    Startup(String),
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl DebugError {
    /// True when the target connection is gone; the controller reacts by
    /// transitioning to the no-session state.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DebugError::Vm(err) if err.is_disconnect())
    }
}
