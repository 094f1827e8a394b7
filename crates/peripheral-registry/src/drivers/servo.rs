//! mindsensors.com 8-channel servo controller

use crate::encode::{encode, from_si};
use crate::hooks::{ChildSpawner, HookFlow, PeripheralHooks};
use crate::{Error, ModeInfo, Peripheral, PeripheralKind, Result};

const CHANNELS: u8 = 8;
const POSITION_REG: u8 = 0x42;
const RATE_REG: u8 = 0x52;
const RATE_NUMERATOR: u32 = 24000;
const CONTROLLER_POLL_MS: u32 = 1000;

pub(super) struct Ms8chServo;

impl PeripheralHooks for Ms8chServo {
    fn probe(&self, dev: &mut Peripheral, children: &mut ChildSpawner) -> Result<()> {
        children.spawn_channels("ms-8ch-servo-channel", "sv", CHANNELS);
        // battery voltage changes slowly
        dev.set_poll_ms(CONTROLLER_POLL_MS);
        Ok(())
    }
}

pub(super) struct Ms8chServoChannel;

impl PeripheralHooks for Ms8chServoChannel {
    fn pre_set_mode(&self, _dev: &mut Peripheral, _mode: usize) -> Result<HookFlow> {
        Ok(HookFlow::Handled)
    }

    fn poll(&self, dev: &mut Peripheral) -> Result<()> {
        let mode = dev.mode_info();
        let reg = dev.channel_register(mode.read_reg, mode.raw_size() as u8);
        dev.read_into_raw(reg)
    }
}

/// Register value for a sweep rate in milliseconds; 0 means full speed.
pub fn servo_rate_register_value(ms: u32) -> u8 {
    if ms >= RATE_NUMERATOR {
        1
    } else if ms < 94 {
        0
    } else {
        (RATE_NUMERATOR / ms) as u8
    }
}

/// Servo control on one channel of a servo controller
pub struct ServoChannel<'a> {
    dev: &'a Peripheral,
}

impl Peripheral {
    pub fn as_servo(&self) -> Result<ServoChannel<'_>> {
        if self.kind() != PeripheralKind::Ms8chServoChannel {
            return Err(Error::WrongKind {
                operation: "servo control",
                kind: self.kind(),
            });
        }
        Ok(ServoChannel { dev: self })
    }
}

impl ServoChannel<'_> {
    /// Commanded pulse width in microseconds; 0 means the output is off.
    pub fn position(&self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.dev
            .read_block(self.dev.channel_register(POSITION_REG, 2), &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn set_position(&self, us: u16) -> Result<()> {
        let mode = self.mode("POSITION")?;
        let raw = from_si(f64::from(us), mode)?;
        let bytes = encode(&[raw], mode.data_type)?;
        self.dev
            .write_block(self.dev.channel_register(POSITION_REG, 2), &bytes)
    }

    /// Full-sweep time in milliseconds; 0 means full speed.
    pub fn rate(&self) -> Result<u32> {
        let raw = self.dev.read_byte(self.dev.channel_register(RATE_REG, 1))?;
        if raw == 0 {
            return Ok(0);
        }
        Ok(RATE_NUMERATOR / u32::from(raw))
    }

    pub fn set_rate(&self, ms: u32) -> Result<()> {
        self.dev.write_byte(
            self.dev.channel_register(RATE_REG, 1),
            servo_rate_register_value(ms),
        )
    }

    fn mode(&self, name: &str) -> Result<&ModeInfo> {
        self.dev
            .modes()
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::InvalidMode {
                requested: name.to_string(),
                available: self.dev.modes().len(),
            })
    }
}
