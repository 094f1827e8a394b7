//! mindsensors.com NxtMMX motor multiplexer
//!
//! Each motor channel owns a slot in the encoder and status banks; commands
//! for the second motor use the next command letter.

use crate::hooks::{ChildSpawner, HookFlow, PeripheralHooks};
use crate::{Error, MotorInfo, Peripheral, PeripheralKind, Result};

const MOTORS: u8 = 2;
const ENCODER_REG: u8 = 0x62;
const STATUS_REG: u8 = 0x72;

pub(super) struct MsNxtmmx;

impl PeripheralHooks for MsNxtmmx {
    fn probe(&self, _dev: &mut Peripheral, children: &mut ChildSpawner) -> Result<()> {
        children.spawn_channels("ms-nxtmmx-motor", "mux", MOTORS);
        Ok(())
    }
}

pub(super) struct MsNxtmmxMotor;

impl PeripheralHooks for MsNxtmmxMotor {
    fn pre_set_mode(&self, _dev: &mut Peripheral, _mode: usize) -> Result<HookFlow> {
        Ok(HookFlow::Handled)
    }

    fn poll(&self, dev: &mut Peripheral) -> Result<()> {
        let mode = dev.mode_info();
        let reg = dev.channel_register(mode.read_reg, mode.raw_size() as u8);
        dev.read_into_raw(reg)
    }

    fn pre_send_command(&self, dev: &mut Peripheral, command: usize) -> Result<HookFlow> {
        let (reg, data) = {
            let cmd = &dev.descriptor.commands[command];
            (cmd.reg, cmd.data)
        };
        let data = data.wrapping_add(dev.channel().unwrap_or(0));
        dev.write_byte(reg, data)?;
        Ok(HookFlow::Handled)
    }
}

/// Encoder and tuning access on one motor channel of a motor multiplexer
pub struct MotorChannel<'a> {
    dev: &'a Peripheral,
}

impl Peripheral {
    pub fn as_motor(&self) -> Result<MotorChannel<'_>> {
        if self.kind() != PeripheralKind::MsNxtmmxMotor {
            return Err(Error::WrongKind {
                operation: "motor control",
                kind: self.kind(),
            });
        }
        Ok(MotorChannel { dev: self })
    }
}

impl MotorChannel<'_> {
    /// Encoder position in tacho counts.
    pub fn encoder(&self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.dev
            .read_block(self.dev.channel_register(ENCODER_REG, 4), &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Raw status flags of this motor.
    pub fn status(&self) -> Result<u8> {
        self.dev.read_byte(self.dev.channel_register(STATUS_REG, 1))
    }

    pub fn tuning(&self) -> Option<&MotorInfo> {
        self.dev.motor.as_ref()
    }
}
