use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no acknowledgement from device at address {0}")]
    NoAck(crate::BusAddress),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("invalid transfer: {0}")]
    InvalidTransfer(&'static str),
}
