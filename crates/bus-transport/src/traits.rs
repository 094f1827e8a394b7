use crate::{BusAddress, PinState, PortPin, Result, TransportError};

/// A minimal blocking register-bus interface.
///
/// Backends implement block transfers; byte and word helpers are derived from them.
/// Words are little-endian, matching SMBus word transfers.
pub trait RegisterBus {
    /// Name of the port or adapter (e.g., "in1", "mock0").
    fn name(&self) -> &str;

    /// Read `buf.len()` consecutive registers starting at `reg`.
    fn read_block(&mut self, addr: BusAddress, reg: u8, buf: &mut [u8]) -> Result<()>;

    /// Write `data` to consecutive registers starting at `reg`.
    fn write_block(&mut self, addr: BusAddress, reg: u8, data: &[u8]) -> Result<()>;

    fn read_byte(&mut self, addr: BusAddress, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_block(addr, reg, &mut buf)?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, addr: BusAddress, reg: u8, value: u8) -> Result<()> {
        self.write_block(addr, reg, &[value])
    }

    fn read_word(&mut self, addr: BusAddress, reg: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_block(addr, reg, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn write_word(&mut self, addr: BusAddress, reg: u8, value: u16) -> Result<()> {
        self.write_block(addr, reg, &value.to_le_bytes())
    }

    /// Drive a port GPIO line if supported.
    fn set_gpio(&mut self, _pin: PortPin, _state: PinState) -> Result<()> {
        Err(TransportError::Unsupported("gpio not supported"))
    }

    /// Sample an analog port pin in millivolts if supported.
    fn read_analog(&mut self, _pin: PortPin) -> Result<u16> {
        Err(TransportError::Unsupported("analog input not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Register-only backend, like a bare I2C adapter
    struct BareAdapter;

    impl RegisterBus for BareAdapter {
        fn name(&self) -> &str {
            "i2c-bare"
        }

        fn read_block(&mut self, _addr: BusAddress, _reg: u8, buf: &mut [u8]) -> Result<()> {
            buf.fill(0x5A);
            Ok(())
        }

        fn write_block(&mut self, _addr: BusAddress, _reg: u8, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_port_lines_unsupported_by_default() {
        let mut bus = BareAdapter;
        assert!(matches!(
            bus.set_gpio(PortPin::Pin1, PinState::High),
            Err(TransportError::Unsupported(_))
        ));
        assert!(matches!(
            bus.read_analog(PortPin::Pin6),
            Err(TransportError::Unsupported(_))
        ));
        let addr = BusAddress::new(0x01).unwrap();
        assert_eq!(bus.read_word(addr, 0x42).unwrap(), 0x5A5A);
    }
}
