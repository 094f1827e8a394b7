use crate::{DataType, PeripheralId, PeripheralKind};
use bus_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown peripheral type: {0}")]
    UnknownType(String),
    #[error("invalid mode {requested} (peripheral has {available} modes)")]
    InvalidMode { requested: String, available: usize },
    #[error("invalid command {requested} (peripheral has {available} commands)")]
    InvalidCommand { requested: String, available: usize },
    #[error("buffer too short: need {needed} bytes, have {actual}")]
    BufferTooShort { needed: usize, actual: usize },
    #[error("degenerate scale in mode {mode}: {bound} min and max are both {value}")]
    DegenerateScale {
        mode: String,
        bound: &'static str,
        value: i64,
    },
    #[error("scale error: {0}")]
    ScaleError(String),
    #[error("bus error: {0}")]
    Bus(#[from] TransportError),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("peripheral {0} was already detached")]
    DoubleDetach(PeripheralId),
    #[error("peripheral {0} is not attached")]
    NotAttached(PeripheralId),
    #[error("register offset {0} is beyond the register map")]
    InvalidOffset(usize),
    #[error("mode {0} is read-only")]
    ReadOnlyMode(String),
    #[error("mode {mode} takes 1 to {max} values, got {given}")]
    ValueCount {
        mode: String,
        given: usize,
        max: usize,
    },
    #[error("value {value} does not fit {data_type:?}")]
    OutOfRange { value: f64, data_type: DataType },
    #[error("invalid descriptor: {0}")]
    Descriptor(String),
    #[error("{operation} is not available on {kind:?} peripherals")]
    WrongKind {
        operation: &'static str,
        kind: PeripheralKind,
    },
}
