use crate::{
    BusAddress, PinState, PortPin, RegisterBus, Result, TransportError, ID_STRING_LEN,
    PRODUCT_ID_REG, VENDOR_ID_REG,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A write transaction recorded by the mock bus
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MockWrite {
    pub addr: BusAddress,
    pub reg: u8,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    registers: HashMap<(BusAddress, u8), u8>,
    analog: HashMap<PortPin, u16>,
    gpio: HashMap<PortPin, PinState>,
    writes: Vec<MockWrite>,
    reads: usize,
    pending_read_failures: HashMap<(BusAddress, u8), usize>,
    failing_writes: HashSet<(BusAddress, u8)>,
    absent: HashSet<BusAddress>,
}

/// An in-process register file standing in for a port.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// peripheral under test owns another. Unset registers read as zero.
#[derive(Clone)]
pub struct MockBus {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn set_registers(&self, addr: BusAddress, reg: u8, bytes: &[u8]) {
        let mut state = self.state.lock();
        for (offset, b) in bytes.iter().enumerate() {
            state
                .registers
                .insert((addr, reg.wrapping_add(offset as u8)), *b);
        }
    }

    pub fn register(&self, addr: BusAddress, reg: u8) -> u8 {
        self.state
            .lock()
            .registers
            .get(&(addr, reg))
            .copied()
            .unwrap_or(0)
    }

    /// Load space-padded vendor and product id strings.
    pub fn set_ids(&self, addr: BusAddress, vendor: &str, product: &str) {
        self.set_registers(addr, VENDOR_ID_REG, &padded_id(vendor));
        self.set_registers(addr, PRODUCT_ID_REG, &padded_id(product));
    }

    pub fn set_analog(&self, pin: PortPin, millivolts: u16) {
        self.state.lock().analog.insert(pin, millivolts);
    }

    pub fn gpio(&self, pin: PortPin) -> Option<PinState> {
        self.state.lock().gpio.get(&pin).copied()
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    /// NAK the next `count` reads starting at `reg`.
    pub fn fail_next_reads(&self, addr: BusAddress, reg: u8, count: usize) {
        self.state
            .lock()
            .pending_read_failures
            .insert((addr, reg), count);
    }

    /// NAK every write starting at `reg` until cleared.
    pub fn fail_writes_to(&self, addr: BusAddress, reg: u8) {
        self.state.lock().failing_writes.insert((addr, reg));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.pending_read_failures.clear();
        state.failing_writes.clear();
    }

    /// Stop acknowledging any transfer to `addr`.
    pub fn remove_device(&self, addr: BusAddress) {
        self.state.lock().absent.insert(addr);
    }
}

impl RegisterBus for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_block(&mut self, addr: BusAddress, reg: u8, buf: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.absent.contains(&addr) {
            return Err(TransportError::NoAck(addr));
        }
        if let Some(left) = state.pending_read_failures.get_mut(&(addr, reg)) {
            if *left > 0 {
                *left -= 1;
                return Err(TransportError::NoAck(addr));
            }
        }
        if buf.len() > 32 {
            return Err(TransportError::InvalidTransfer("block longer than 32 bytes"));
        }
        state.reads += 1;
        for (offset, b) in buf.iter_mut().enumerate() {
            let key = (addr, reg.wrapping_add(offset as u8));
            *b = state.registers.get(&key).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_block(&mut self, addr: BusAddress, reg: u8, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.absent.contains(&addr) || state.failing_writes.contains(&(addr, reg)) {
            return Err(TransportError::NoAck(addr));
        }
        if data.len() > 32 {
            return Err(TransportError::InvalidTransfer("block longer than 32 bytes"));
        }
        for (offset, b) in data.iter().enumerate() {
            state
                .registers
                .insert((addr, reg.wrapping_add(offset as u8)), *b);
        }
        state.writes.push(MockWrite {
            addr,
            reg,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn set_gpio(&mut self, pin: PortPin, pin_state: PinState) -> Result<()> {
        self.state.lock().gpio.insert(pin, pin_state);
        Ok(())
    }

    fn read_analog(&mut self, pin: PortPin) -> Result<u16> {
        let mut state = self.state.lock();
        state.reads += 1;
        Ok(state.analog.get(&pin).copied().unwrap_or(0))
    }
}

fn padded_id(text: &str) -> [u8; ID_STRING_LEN] {
    let mut out = [b' '; ID_STRING_LEN];
    for (slot, b) in out.iter_mut().zip(text.bytes()) {
        *slot = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_registers_read_zero() {
        let mut bus = MockBus::new("mock0");
        let addr = BusAddress::new(0x08).unwrap();
        let mut buf = [0xAAu8; 4];
        bus.read_block(addr, 0x42, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
        assert_eq!(bus.read_count(), 1);
    }

    #[test]
    fn test_writes_are_logged_and_readable() {
        let mut bus = MockBus::new("mock0");
        let addr = BusAddress::new(0x08).unwrap();
        bus.write_block(addr, 0x41, &[0x43]).unwrap();
        assert_eq!(bus.read_byte(addr, 0x41).unwrap(), 0x43);
        assert_eq!(
            bus.writes(),
            vec![MockWrite {
                addr,
                reg: 0x41,
                data: vec![0x43]
            }]
        );
    }

    #[test]
    fn test_failure_injection() {
        let mut bus = MockBus::new("mock0");
        let addr = BusAddress::new(0x08).unwrap();
        bus.fail_writes_to(addr, 0x41);
        assert!(bus.write_byte(addr, 0x41, 1).is_err());
        assert!(bus.write_byte(addr, 0x42, 1).is_ok());
        bus.clear_failures();
        assert!(bus.write_byte(addr, 0x41, 1).is_ok());

        bus.remove_device(addr);
        assert_eq!(bus.read_byte(addr, 0x00), Err(TransportError::NoAck(addr)));
    }

    #[test]
    fn test_gpio_and_analog() {
        let mut bus = MockBus::new("mock0");
        assert_eq!(bus.gpio(PortPin::Pin1), None);
        bus.set_gpio(PortPin::Pin1, PinState::High).unwrap();
        assert_eq!(bus.gpio(PortPin::Pin1), Some(PinState::High));

        bus.set_analog(PortPin::Pin6, 4200);
        assert_eq!(bus.read_analog(PortPin::Pin6).unwrap(), 4200);
    }
}
