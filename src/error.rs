use thiserror::Error;

use crate::power::ProtocolViolation;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error(transparent)]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Transport(TransportError::Ble(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
