use thiserror::Error;

/// Everything a single operator interaction (or a ticker pass) can fail
/// with. All variants are caught at the router boundary and rendered as a
/// chat message; none of them may take the process down.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("{0}")]
    Validation(String),

    #[error("could not understand the time \"{0}\"")]
    Parse(String),

    #[error("no schedule with id {0}")]
    NotFound(String),

    #[error("schedule {0} is no longer pending")]
    InvalidState(String),

    #[error("sender is not the configured operator")]
    Unauthorized,

    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("delivery dispatch failed: {0}")]
    Dispatch(String),

    #[error("persistence backend: {0}")]
    Persistence(String),
}

pub type BotResult<T> = Result<T, BotError>;
