//! Mode selection, command dispatch, polling and scaled read-out.

use crate::decode::{self, RawValue};
use crate::encode::{encode, from_si};
use crate::hooks::HookFlow;
use crate::peripheral::LinkState;
use crate::{Error, ModeInfo, Peripheral, Result, Transport};
use std::sync::Arc;
use tracing::debug;

/// Mode or command chosen by position or by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for Selector<'_> {
    fn from(index: usize) -> Self {
        Selector::Index(index)
    }
}

impl<'a> From<&'a str> for Selector<'a> {
    fn from(name: &'a str) -> Self {
        Selector::Name(name)
    }
}

impl Peripheral {
    pub fn modes(&self) -> &[ModeInfo] {
        &self.modes
    }

    pub fn list_modes(&self) -> Vec<&str> {
        self.modes.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn list_commands(&self) -> Vec<&str> {
        self.descriptor
            .commands
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Index of the active mode.
    pub fn mode(&self) -> usize {
        self.mode
    }

    pub fn mode_info(&self) -> &ModeInfo {
        &self.modes[self.mode]
    }

    pub fn set_mode(&mut self, index: usize) -> Result<()> {
        self.select_mode(Selector::Index(index))
    }

    pub fn set_mode_by_name(&mut self, name: &str) -> Result<()> {
        self.select_mode(Selector::Name(name))
    }

    pub fn select_mode(&mut self, selector: Selector<'_>) -> Result<()> {
        let index = self.resolve_mode(selector)?;
        let previous = self.link;
        self.link = LinkState::Switching;
        let result = self.switch_mode(index);
        self.link = match (&result, previous) {
            (Err(_), LinkState::Detached) => LinkState::Detached,
            _ => LinkState::Active,
        };
        result
    }

    fn switch_mode(&mut self, index: usize) -> Result<()> {
        let hooks = self.kind().hooks();
        if hooks.pre_set_mode(self, index)? == HookFlow::Continue {
            if let Some(write) = self.modes[index].set_mode {
                self.write_byte(write.reg, write.data)?;
            }
        }
        let previous_mode = std::mem::replace(&mut self.mode, index);
        let previous_raw =
            std::mem::replace(&mut self.raw, vec![0u8; self.modes[index].raw_size()]);

        // one read right away so the new buffer never reports zeros
        if let Err(e) = hooks.poll(self) {
            debug!(port = %self.port, error = %e, "initial poll after mode switch failed");
        }

        if let Err(e) = hooks.post_set_mode(self, index) {
            self.mode = previous_mode;
            self.raw = previous_raw;
            return Err(e);
        }
        debug!(
            port = %self.port,
            mode = %self.modes[index].name,
            "mode set"
        );
        Ok(())
    }

    pub fn send_command(&mut self, index: usize) -> Result<()> {
        self.select_command(Selector::Index(index))
    }

    pub fn send_command_by_name(&mut self, name: &str) -> Result<()> {
        self.select_command(Selector::Name(name))
    }

    pub fn select_command(&mut self, selector: Selector<'_>) -> Result<()> {
        let index = self.resolve_command(selector)?;
        let hooks = self.kind().hooks();
        if hooks.pre_send_command(self, index)? == HookFlow::Continue {
            let (reg, data) = {
                let cmd = &self.descriptor.commands[index];
                (cmd.reg, cmd.data)
            };
            self.write_byte(reg, data)?;
        }
        debug!(
            port = %self.port,
            command = %self.descriptor.commands[index].name,
            "command sent"
        );
        hooks.post_send_command(self, index)
    }

    /// Refresh the raw buffer of the active mode from the device.
    pub fn poll(&mut self) -> Result<()> {
        let hooks = self.kind().hooks();
        hooks.poll(self)
    }

    /// Read the active mode's register block, or sample the analog pin.
    pub fn default_poll(&mut self) -> Result<()> {
        let descriptor = Arc::clone(&self.descriptor);
        match descriptor.transport() {
            Transport::Analog(analog) => {
                let millivolts = self.bus.read_analog(analog.pin);
                self.record_analog(millivolts.is_ok());
                let sample = encode(
                    &[RawValue::Int(i64::from(millivolts?))],
                    self.modes[self.mode].data_type,
                )?;
                self.store_raw(&sample);
                Ok(())
            }
            Transport::I2c(_) => {
                let reg = self.modes[self.mode].read_reg;
                self.read_into_raw(reg)
            }
            // UART sensors are read by the port hosting them
            Transport::Uart(_) => Err(Error::WrongKind {
                operation: "poll",
                kind: self.kind(),
            }),
        }
    }

    /// Block-read the active mode's raw buffer from `reg`.
    pub(crate) fn read_into_raw(&mut self, reg: u8) -> Result<()> {
        let mut buf = std::mem::take(&mut self.raw);
        let result = self.read_block(reg, &mut buf);
        self.raw = buf;
        result
    }

    pub(crate) fn store_raw(&mut self, bytes: &[u8]) {
        for (dst, src) in self.raw.iter_mut().zip(bytes) {
            *dst = *src;
        }
    }

    fn record_analog(&self, ok: bool) {
        if let Some(m) = &self.metrics {
            m.bus_reads.inc();
            if !ok {
                m.bus_errors.inc();
            }
        }
    }

    pub fn raw_reading(&self) -> &[u8] {
        &self.raw
    }

    /// Scaled value `index` of the last poll, in physical units.
    pub fn value(&self, index: usize) -> Result<f64> {
        let mode = &self.modes[self.mode];
        if index >= mode.data_sets {
            return Err(Error::BufferTooShort {
                needed: (index + 1) * mode.data_type.width(),
                actual: self.raw.len(),
            });
        }
        decode::to_si(&self.raw, index, mode, &self.context)
    }

    /// Every scaled value of the last poll, in physical units.
    pub fn current_reading(&self) -> Result<Vec<f64>> {
        (0..self.modes[self.mode].data_sets)
            .map(|i| self.value(i))
            .collect()
    }

    pub fn pct_reading(&self) -> Result<Vec<i64>> {
        let mode = &self.modes[self.mode];
        (0..mode.data_sets)
            .map(|i| decode::to_pct(&self.raw, i, mode))
            .collect()
    }

    /// Write physical values to the active mode's registers.
    ///
    /// Only modes past the descriptor's read-only prefix accept output. The
    /// written bytes also become the mode's raw buffer.
    pub fn write_output(&mut self, values: &[f64]) -> Result<()> {
        let mode = &self.modes[self.mode];
        if !self.descriptor.is_writable_mode(self.mode) {
            return Err(Error::ReadOnlyMode(mode.name.clone()));
        }
        if self.descriptor.i2c.is_none() {
            return Err(Error::WrongKind {
                operation: "write_output",
                kind: self.kind(),
            });
        }
        if values.is_empty() || values.len() > mode.data_sets {
            return Err(Error::ValueCount {
                mode: mode.name.clone(),
                given: values.len(),
                max: mode.data_sets,
            });
        }
        let raw = values
            .iter()
            .map(|v| from_si(*v, mode))
            .collect::<Result<Vec<_>>>()?;
        let bytes = encode(&raw, mode.data_type)?;
        let reg = mode.read_reg;
        self.write_block(reg, &bytes)?;
        self.store_raw(&bytes);
        debug!(port = %self.port, reg, len = bytes.len(), "output written");
        Ok(())
    }

    fn resolve_mode(&self, selector: Selector<'_>) -> Result<usize> {
        let available = self.modes.len();
        match selector {
            Selector::Index(i) if i < available => Ok(i),
            Selector::Name(name) => self
                .modes
                .iter()
                .position(|m| m.name == name)
                .ok_or_else(|| Error::InvalidMode {
                    requested: name.to_string(),
                    available,
                }),
            Selector::Index(i) => Err(Error::InvalidMode {
                requested: i.to_string(),
                available,
            }),
        }
    }

    fn resolve_command(&self, selector: Selector<'_>) -> Result<usize> {
        let available = self.descriptor.commands.len();
        match selector {
            Selector::Index(i) if i < available => Ok(i),
            Selector::Name(name) => {
                self.descriptor
                    .command_index(name)
                    .ok_or_else(|| Error::InvalidCommand {
                        requested: name.to_string(),
                        available,
                    })
            }
            Selector::Index(i) => Err(Error::InvalidCommand {
                requested: i.to_string(),
                available,
            }),
        }
    }
}
