//! bus-transport: register-bus abstractions for sensor and motor ports
//!
//! This crate provides the capability traits that peripheral drivers use to talk to
//! I2C register maps, port GPIO lines and analog inputs. The default build enables a
//! `mock` backend so that binaries and tests run on any host without port hardware.

mod types;
pub use types::{BusAddress, DeviceIds, PinState, PortPin};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::RegisterBus;

mod shared;
pub use shared::SharedBus;

mod identify;
pub use identify::{
    identify, read_fw_version, FW_VERSION_REG, ID_STRING_LEN, PRODUCT_ID_REG, VENDOR_ID_REG,
};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, MockWrite};
