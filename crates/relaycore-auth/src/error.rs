use relaycore_model::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token did not match any known owner")]
    InvalidToken,

    #[error("token was empty")]
    EmptyToken,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Forbidden
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
