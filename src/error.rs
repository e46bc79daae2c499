use thiserror::Error;

use crate::data_link::IdKind;
use crate::service::rx::RxKey;
use crate::types::{CanId, DeviceInstance};

#[derive(Debug, Error)]
pub enum CanError {
    // Registration errors
    #[error("duplicate receive registration for {0}")]
    DuplicateRegistration(RxKey),
    #[error("{table} table is full (capacity {capacity})")]
    OutOfCapacity { table: &'static str, capacity: usize },
    #[error("registration not found")]
    NotFound,

    // Device directory errors
    #[error("unknown device instance {0}")]
    UnknownDevice(DeviceInstance),
    #[error("device instance {0} already created")]
    DuplicateDevice(DeviceInstance),

    // Frame and codec errors
    #[error("identifier {id:#x} does not fit a {kind:?} frame")]
    InvalidIdentifier { id: CanId, kind: IdKind },
    #[error("payload of {len} bytes exceeds the frame length")]
    PayloadTooLong { len: usize },
    #[error("payload too short: needed {needed} bytes, {available} available")]
    PayloadTooShort { needed: usize, available: usize },

    // Bus errors
    #[error("transmit buffer full")]
    BufferFull,
    #[error("port error: {0}")]
    Port(String),

    // Generic errors
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

pub type Result<T> = std::result::Result<T, CanError>;
