mod from;
mod step;

use std::{fmt::Display, path::PathBuf};

use thiserror::Error;

pub use step::{StepError, StepResult};

pub type Result<T> = std::result::Result<T, Error>;

pub const OK: Result<()> = Ok(());

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("no active session, call `connect` first")]
    NoActiveSession,

    #[error("another phase is already running on this handle")]
    Busy,

    #[error("handle has not been initialized")]
    NotInitialized,

    #[error("login to `{0}` failed")]
    LoginFailed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("no item found for key `{0}`")]
    ItemNotFound(String),

    #[error("storage URL `{0}` is invalid")]
    InvalidStorageUrl(String),

    #[error("install session id could not be parsed from `{0}`")]
    InvalidSessionId(String),

    #[error("`{0}` does not exist")]
    FileDoesNotExist(PathBuf),

    #[error("`{0}` is not a directory")]
    FileIsNotDirectory(PathBuf),

    #[error("protocol `{0}` is not enabled in this build")]
    ProtocolDisabled(String),

    #[error(transparent)]
    Other(AnyError),
}

#[derive(Error, Debug)]
pub struct AnyError(anyhow::Error);

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for AnyError {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(AnyError(error.into()))
    }

    pub fn network<E: Display>(error: E) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(AnyError(error))
    }
}
