use jobs::Status;
use uuid::Uuid;

/// Failures surfaced by the job service. Builder failures leave the
/// repository untouched; dispatcher failures abort the current inbound
/// batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wrong arguments for {command}: {reason}")]
    Arguments { command: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unrecognized command: {0}")]
    UnknownKind(String),

    #[error("{0} is not a known agent")]
    UnknownAgent(Uuid),

    #[error("no tracked job with id {0}")]
    UnknownJob(String),

    #[error("a job with id {0} is already tracked")]
    DuplicateJob(String),

    #[error("job {0} did not contain the correct token")]
    BadToken(String),

    #[error("job {id} was previously {status}")]
    AlreadyTerminal { id: String, status: Status },

    #[error("there are no known agents, no jobs were created")]
    NoAgents,
}

impl Error {
    pub(crate) fn arguments(command: &str, reason: impl Into<String>) -> Self {
        Error::Arguments {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<jobs::Error> for Error {
    fn from(err: jobs::Error) -> Self {
        match err {
            jobs::Error::NotFound(id) => Error::UnknownJob(id),
            jobs::Error::Duplicate(id) => Error::DuplicateJob(id),
        }
    }
}
