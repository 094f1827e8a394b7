use core::fmt;
use serde::{Deserialize, Serialize};

/// 7-bit I2C device address
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BusAddress(u8);

impl BusAddress {
    pub fn new(addr: u8) -> Option<Self> {
        if addr <= 0x7F {
            Some(Self(addr))
        } else {
            None
        }
    }

    pub fn raw(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for BusAddress {
    type Error = String;

    fn try_from(addr: u8) -> Result<Self, Self::Error> {
        Self::new(addr).ok_or_else(|| format!("0x{addr:02X} is not a 7-bit address"))
    }
}

impl From<BusAddress> for u8 {
    fn from(addr: BusAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{raw:02X}", raw = self.0)
    }
}

/// Level a port GPIO line is driven to. `Float` releases the line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    Low,
    High,
    Float,
}

/// Port pins a driver can drive or sample
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortPin {
    Pin1,
    Pin2,
    Pin5,
    Pin6,
}

/// Identification strings read from a device's ID registers
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DeviceIds {
    pub vendor_id: String,
    pub product_id: String,
}
