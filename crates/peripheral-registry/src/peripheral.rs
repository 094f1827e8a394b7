use crate::hooks::DriverContext;
use crate::metrics::DeviceMetrics;
use crate::{Error, MotorInfo, ModeInfo, PeripheralDescriptor, PeripheralKind, Result};
use bus_transport::{BusAddress, SharedBus};
use core::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

pub const DEFAULT_POLL_MS: u32 = 100;
pub const MIN_POLL_MS: u32 = 50;

/// Handle to a peripheral registered with a [`crate::PeripheralManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(pub(crate) u64);

impl PeripheralId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Detached,
    Switching,
    Active,
}

/// A live peripheral bound to a bus.
///
/// Holds a private copy of the mode table because hooks may rescale it at runtime.
pub struct Peripheral {
    pub(crate) id: PeripheralId,
    pub(crate) descriptor: Arc<PeripheralDescriptor>,
    pub(crate) modes: Vec<ModeInfo>,
    pub(crate) bus: SharedBus,
    pub(crate) address: BusAddress,
    pub(crate) port: String,
    pub(crate) channel: Option<u8>,
    pub(crate) motor: Option<MotorInfo>,
    pub(crate) mode: usize,
    pub(crate) raw: Vec<u8>,
    pub(crate) link: LinkState,
    pub(crate) fw_version: String,
    pub(crate) poll_ms: u32,
    pub(crate) context: DriverContext,
    pub(crate) attached_at: OffsetDateTime,
    pub(crate) metrics: Option<DeviceMetrics>,
}

impl Peripheral {
    pub(crate) fn new(
        id: PeripheralId,
        descriptor: Arc<PeripheralDescriptor>,
        bus: SharedBus,
        address: BusAddress,
        port: String,
    ) -> Self {
        Self {
            id,
            modes: descriptor.modes.clone(),
            descriptor,
            bus,
            address,
            port,
            channel: None,
            motor: None,
            mode: 0,
            raw: Vec::new(),
            link: LinkState::Detached,
            fw_version: String::new(),
            poll_ms: DEFAULT_POLL_MS,
            context: DriverContext::None,
            attached_at: OffsetDateTime::now_utc(),
            metrics: None,
        }
    }

    pub fn id(&self) -> PeripheralId {
        self.id
    }

    pub fn type_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn kind(&self) -> PeripheralKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &PeripheralDescriptor {
        &self.descriptor
    }

    pub fn port_identity(&self) -> &str {
        &self.port
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn fw_version(&self) -> &str {
        &self.fw_version
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn attached_at(&self) -> OffsetDateTime {
        self.attached_at
    }

    pub fn context(&self) -> &DriverContext {
        &self.context
    }

    pub(crate) fn set_context(&mut self, context: DriverContext) {
        self.context = context;
    }

    pub fn poll_ms(&self) -> u32 {
        self.poll_ms
    }

    /// Set the polling period. Zero disables polling; nonzero values are at least 50 ms.
    pub fn set_poll_ms(&mut self, ms: u32) {
        self.poll_ms = if ms == 0 { 0 } else { ms.max(MIN_POLL_MS) };
    }

    /// Read `count` registers starting at `offset`, bypassing mode handling.
    pub fn direct_read(&self, offset: usize, count: usize) -> Result<Vec<u8>> {
        let reg = self.direct_offset(offset, "direct_read")?;
        let mut buf = vec![0u8; count];
        self.read_block(reg, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` to registers starting at `offset`, bypassing mode handling.
    pub fn direct_write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let reg = self.direct_offset(offset, "direct_write")?;
        self.write_block(reg, data)
    }

    fn direct_offset(&self, offset: usize, operation: &'static str) -> Result<u8> {
        if self.descriptor.i2c.is_none() {
            return Err(Error::WrongKind {
                operation,
                kind: self.kind(),
            });
        }
        u8::try_from(offset).map_err(|_| Error::InvalidOffset(offset))
    }

    pub(crate) fn read_block(&self, reg: u8, buf: &mut [u8]) -> Result<()> {
        let result = self.bus.read_block(self.address, reg, buf);
        self.record(BusOp::Read, result.is_ok());
        Ok(result?)
    }

    pub(crate) fn write_block(&self, reg: u8, data: &[u8]) -> Result<()> {
        let result = self.bus.write_block(self.address, reg, data);
        self.record(BusOp::Write, result.is_ok());
        Ok(result?)
    }

    pub(crate) fn read_byte(&self, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_block(reg, &mut buf)?;
        Ok(buf[0])
    }

    pub(crate) fn write_byte(&self, reg: u8, value: u8) -> Result<()> {
        self.write_block(reg, &[value])
    }

    /// Register of this channel's slot in a bank of per-channel registers.
    pub(crate) fn channel_register(&self, base: u8, stride: u8) -> u8 {
        base.wrapping_add(stride.wrapping_mul(self.channel.unwrap_or(0)))
    }

    fn record(&self, op: BusOp, ok: bool) {
        if let Some(m) = &self.metrics {
            match op {
                BusOp::Read => m.bus_reads.inc(),
                BusOp::Write => m.bus_writes.inc(),
            }
            if !ok {
                m.bus_errors.inc();
            }
        }
    }
}

enum BusOp {
    Read,
    Write,
}

impl fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripheral")
            .field("id", &self.id)
            .field("type_id", &self.descriptor.id)
            .field("port", &self.port)
            .field("address", &self.address)
            .field("mode", &self.mode)
            .field("link", &self.link)
            .finish()
    }
}
