//! Sensor multiplexers and their per-channel ports.
//!
//! A port child shares the multiplexer's address; each channel owns a fixed
//! slot in the multiplexer's register map.

use crate::hooks::{ChildSpawner, DriverContext, HookFlow, PeripheralHooks, SmuxRunState};
use crate::{Error, Peripheral, Result};
use tracing::debug;

const HT_SMUX_PORTS: u8 = 4;
const HT_SMUX_COMMAND_REG: u8 = 0x20;
const HT_SMUX_I2C_BUFFER_STRIDE: u8 = 0x10;
const HT_SMUX_ANALOG_MODE: &str = "ANALOG";

const MS_EV3_SMUX_PORTS: u8 = 3;
const MS_EV3_SMUX_BANK_STRIDE: u8 = 0x10;
const MS_EV3_SMUX_MODE_REG: u8 = 0x52;

/// HiTechnic NXT Sensor Multiplexer
pub(super) struct HtNxtSmux;

impl HtNxtSmux {
    fn run_state(dev: &Peripheral) -> Option<SmuxRunState> {
        match dev.context() {
            DriverContext::HtSmux { run_state } => Some(*run_state),
            _ => None,
        }
    }

    fn set_run_state(dev: &mut Peripheral, run_state: SmuxRunState) {
        debug!(port = %dev.port, ?run_state, "smux state");
        dev.set_context(DriverContext::HtSmux { run_state });
    }
}

impl PeripheralHooks for HtNxtSmux {
    fn probe(&self, dev: &mut Peripheral, children: &mut ChildSpawner) -> Result<()> {
        dev.set_context(DriverContext::HtSmux {
            run_state: SmuxRunState::Halted,
        });
        children.spawn_channels("ht-nxt-smux-port", "mux", HT_SMUX_PORTS);
        Ok(())
    }

    fn remove(&self, dev: &mut Peripheral) {
        dev.set_context(DriverContext::None);
    }

    fn poll(&self, dev: &mut Peripheral) -> Result<()> {
        dev.default_poll()?;
        let status = dev.raw_reading().first().copied();
        if let Some(state) = status.and_then(SmuxRunState::from_status) {
            Self::set_run_state(dev, state);
        }
        Ok(())
    }

    fn post_set_mode(&self, dev: &mut Peripheral, _mode: usize) -> Result<()> {
        // the only mode starts the multiplexer; read back what it did
        let status = dev.read_byte(HT_SMUX_COMMAND_REG)?;
        let state = SmuxRunState::from_status(status).unwrap_or(SmuxRunState::Running);
        Self::set_run_state(dev, state);
        Ok(())
    }

    fn pre_send_command(&self, dev: &mut Peripheral, command: usize) -> Result<HookFlow> {
        let name = dev.descriptor.commands[command].name.as_str();
        // channel detection only runs from the halted state
        if name == "DETECT" && Self::run_state(dev) != Some(SmuxRunState::Halted) {
            return Err(Error::InvalidCommand {
                requested: format!("{name} while not halted"),
                available: dev.descriptor.commands.len(),
            });
        }
        Ok(HookFlow::Continue)
    }

    fn post_send_command(&self, dev: &mut Peripheral, command: usize) -> Result<()> {
        let state = match dev.descriptor.commands[command].name.as_str() {
            "HALT" => SmuxRunState::Halted,
            "DETECT" => SmuxRunState::Detecting,
            "RUN" => SmuxRunState::Running,
            _ => return Ok(()),
        };
        Self::set_run_state(dev, state);
        Ok(())
    }
}

/// One input channel of a HiTechnic sensor multiplexer
pub(super) struct HtNxtSmuxPort;

impl PeripheralHooks for HtNxtSmuxPort {
    fn pre_set_mode(&self, _dev: &mut Peripheral, _mode: usize) -> Result<HookFlow> {
        // the multiplexer configures channels during detection
        Ok(HookFlow::Handled)
    }

    fn poll(&self, dev: &mut Peripheral) -> Result<()> {
        let mode = dev.mode_info();
        let stride = if mode.name == HT_SMUX_ANALOG_MODE {
            mode.raw_size() as u8
        } else {
            HT_SMUX_I2C_BUFFER_STRIDE
        };
        let reg = dev.channel_register(mode.read_reg, stride);
        dev.read_into_raw(reg)
    }
}

/// mindsensors.com EV3 Sensor Multiplexer
pub(super) struct MsEv3Smux;

impl PeripheralHooks for MsEv3Smux {
    fn probe(&self, _dev: &mut Peripheral, children: &mut ChildSpawner) -> Result<()> {
        children.spawn_channels("ms-ev3-smux-port", "mux", MS_EV3_SMUX_PORTS);
        Ok(())
    }

    fn poll(&self, _dev: &mut Peripheral) -> Result<()> {
        // the multiplexer itself has no data; readings live on the ports
        Ok(())
    }
}

/// One input channel of a mindsensors.com EV3 sensor multiplexer
pub(super) struct MsEv3SmuxPort;

impl PeripheralHooks for MsEv3SmuxPort {
    fn pre_set_mode(&self, dev: &mut Peripheral, mode: usize) -> Result<HookFlow> {
        select_bank_mode(dev, mode)?;
        Ok(HookFlow::Handled)
    }

    fn poll(&self, dev: &mut Peripheral) -> Result<()> {
        read_bank(dev)
    }
}

/// Write `mode` to the mode register of the channel's bank on an EV3 multiplexer.
pub(super) fn select_bank_mode(dev: &Peripheral, mode: usize) -> Result<()> {
    let reg = dev.channel_register(MS_EV3_SMUX_MODE_REG, MS_EV3_SMUX_BANK_STRIDE);
    let mode = u8::try_from(mode).map_err(|_| Error::InvalidMode {
        requested: mode.to_string(),
        available: dev.modes().len(),
    })?;
    dev.write_byte(reg, mode)
}

/// Read the active mode's data from the channel's bank on an EV3 multiplexer.
pub(super) fn read_bank(dev: &mut Peripheral) -> Result<()> {
    let reg = dev.channel_register(dev.mode_info().read_reg, MS_EV3_SMUX_BANK_STRIDE);
    dev.read_into_raw(reg)
}
