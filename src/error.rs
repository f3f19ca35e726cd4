use std::time::Duration;
use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("{service} timed out after {}ms", after.as_millis())]
    CollaboratorTimeout {
        service: &'static str,
        after: Duration,
    },

    #[error("{service} error: {message}")]
    Collaborator {
        service: &'static str,
        message: String,
    },

    #[error("transport send failed: {0}")]
    TransportSend(#[source] std::io::Error),

    #[error("worker pool queue is full")]
    PoolSaturated,

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn collaborator(service: &'static str, message: impl Into<String>) -> Self {
        RelayError::Collaborator {
            service,
            message: message.into(),
        }
    }
}
