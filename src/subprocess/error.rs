use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Interpreter not found: {0}")]
    InterpreterNotFound(String),

    #[error("Stage timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No scripted run for stage '{0}'")]
    Unscripted(String),
}
