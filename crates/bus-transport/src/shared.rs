use crate::{BusAddress, PinState, PortPin, RegisterBus, Result};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Cloneable handle to one bus, shared by a peripheral and its children.
///
/// Every call holds the lock for exactly one transaction, so transfers issued
/// through different handles never interleave.
#[derive(Clone)]
pub struct SharedBus {
    name: Arc<str>,
    inner: Arc<Mutex<Box<dyn RegisterBus + Send>>>,
}

impl SharedBus {
    pub fn new<B>(bus: B) -> Self
    where
        B: RegisterBus + Send + 'static,
    {
        Self {
            name: Arc::from(bus.name()),
            inner: Arc::new(Mutex::new(Box::new(bus))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live handles to this bus.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn read_block(&self, addr: BusAddress, reg: u8, buf: &mut [u8]) -> Result<()> {
        trace!(bus = %self.name, %addr, reg, len = buf.len(), "read block");
        self.inner.lock().read_block(addr, reg, buf)
    }

    pub fn write_block(&self, addr: BusAddress, reg: u8, data: &[u8]) -> Result<()> {
        trace!(bus = %self.name, %addr, reg, len = data.len(), "write block");
        self.inner.lock().write_block(addr, reg, data)
    }

    pub fn read_byte(&self, addr: BusAddress, reg: u8) -> Result<u8> {
        self.inner.lock().read_byte(addr, reg)
    }

    pub fn write_byte(&self, addr: BusAddress, reg: u8, value: u8) -> Result<()> {
        trace!(bus = %self.name, %addr, reg, value, "write byte");
        self.inner.lock().write_byte(addr, reg, value)
    }

    pub fn read_word(&self, addr: BusAddress, reg: u8) -> Result<u16> {
        self.inner.lock().read_word(addr, reg)
    }

    pub fn write_word(&self, addr: BusAddress, reg: u8, value: u16) -> Result<()> {
        trace!(bus = %self.name, %addr, reg, value, "write word");
        self.inner.lock().write_word(addr, reg, value)
    }

    pub fn set_gpio(&self, pin: PortPin, state: PinState) -> Result<()> {
        trace!(bus = %self.name, ?pin, ?state, "set gpio");
        self.inner.lock().set_gpio(pin, state)
    }

    pub fn read_analog(&self, pin: PortPin) -> Result<u16> {
        self.inner.lock().read_analog(pin)
    }
}

impl fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBus")
            .field("name", &self.name)
            .field("handles", &self.handle_count())
            .finish()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::MockBus;

    #[test]
    fn test_clones_share_one_bus() {
        let mock = MockBus::new("mock0");
        let bus = SharedBus::new(mock.clone());
        let other = bus.clone();
        let addr = BusAddress::new(0x01).unwrap();

        bus.write_byte(addr, 0x41, 0x02).unwrap();
        assert_eq!(other.read_byte(addr, 0x41).unwrap(), 0x02);
        assert_eq!(bus.handle_count(), 2);

        drop(other);
        assert_eq!(bus.handle_count(), 1);
        assert_eq!(bus.name(), "mock0");
    }

    #[test]
    fn test_word_is_little_endian() {
        let mock = MockBus::new("mock0");
        let bus = SharedBus::new(mock.clone());
        let addr = BusAddress::new(0x58).unwrap();

        bus.write_word(addr, 0x5A, 1500).unwrap();
        assert_eq!(mock.register(addr, 0x5A), 0xDC);
        assert_eq!(mock.register(addr, 0x5B), 0x05);
        assert_eq!(bus.read_word(addr, 0x5A).unwrap(), 1500);
    }
}
