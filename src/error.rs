use thiserror::Error;

use crate::session::SessionState;
use crate::store::StoreError;

/// Ошибки сигнализации
#[derive(Debug, Error)]
pub enum Error {
    /// Запись звонка не удалось создать, прочитать или обновить
    #[error("signaling store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("call {0} not found")]
    CallNotFound(String),

    /// Описание или кандидат не приняты движком
    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("operation not allowed in state {state:?}: {reason}")]
    InvalidState {
        state: SessionState,
        reason: &'static str,
    },

    #[error("timed out waiting for session state {0:?}")]
    Timeout(SessionState),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Error::CallNotFound(id),
            StoreError::Unavailable(reason) => Error::StoreUnavailable(reason),
        }
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Negotiation(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
