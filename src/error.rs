use thiserror::Error;

/// Errors from the host plumbing around the pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Server error: {0}")]
    Server(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Server(s)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
