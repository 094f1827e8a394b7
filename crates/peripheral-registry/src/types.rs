use crate::{Error, PeripheralKind, Result, ScaleFn};
use bus_transport::{BusAddress, PinState, PortPin};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Largest block a single bus transfer may carry
pub const MAX_BLOCK_LEN: usize = 32;

/// Raw encoding of one value in a mode's data buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    U8,
    S8,
    U16,
    S16,
    U16Be,
    S16Be,
    U32,
    S32,
    U32Be,
    S32Be,
    Float,
}

impl DataType {
    pub const ALL: [DataType; 11] = [
        DataType::U8,
        DataType::S8,
        DataType::U16,
        DataType::S16,
        DataType::U16Be,
        DataType::S16Be,
        DataType::U32,
        DataType::S32,
        DataType::U32Be,
        DataType::S32Be,
        DataType::Float,
    ];

    /// Width of one value in bytes.
    pub fn width(self) -> usize {
        match self {
            DataType::U8 | DataType::S8 => 1,
            DataType::U16 | DataType::S16 | DataType::U16Be | DataType::S16Be => 2,
            DataType::U32 | DataType::S32 | DataType::U32Be | DataType::S32Be | DataType::Float => 4,
        }
    }

    /// Inclusive integer range of the encoding, `None` for floats.
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            DataType::U8 => Some((0, u8::MAX as i64)),
            DataType::S8 => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::U16 | DataType::U16Be => Some((0, u16::MAX as i64)),
            DataType::S16 | DataType::S16Be => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::U32 | DataType::U32Be => Some((0, u32::MAX as i64)),
            DataType::S32 | DataType::S32Be => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::Float => None,
        }
    }
}

/// Whether a mode's bounds describe a real calibration.
///
/// Uncalibrated modes report raw values unscaled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    #[default]
    Calibrated,
    Uncalibrated,
}

/// A single register write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWrite {
    pub reg: u8,
    #[serde(default)]
    pub data: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub name: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub data_sets: usize,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub raw_min: i64,
    #[serde(default)]
    pub raw_max: i64,
    #[serde(default)]
    pub pct_min: i64,
    #[serde(default)]
    pub pct_max: i64,
    #[serde(default)]
    pub si_min: i64,
    #[serde(default)]
    pub si_max: i64,
    #[serde(default)]
    pub decimals: u8,
    #[serde(default)]
    pub figures: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleFn>,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub read_reg: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_mode: Option<RegisterWrite>,
}

impl ModeInfo {
    /// A mode with every optional field at its zero value.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            units: String::new(),
            data_sets: 0,
            data_type: DataType::U8,
            raw_min: 0,
            raw_max: 0,
            pct_min: 0,
            pct_max: 0,
            si_min: 0,
            si_max: 0,
            decimals: 0,
            figures: 0,
            scale: None,
            calibration: Calibration::Calibrated,
            read_reg: 0,
            set_mode: None,
        }
    }

    /// Fill in defaults: a bound pair left at 0/0 receives the default pair.
    pub fn normalized(mut self) -> Self {
        if self.raw_min == 0 && self.raw_max == 0 {
            self.raw_max = 255;
        }
        if self.pct_min == 0 && self.pct_max == 0 {
            self.pct_max = 100;
        }
        if self.si_min == 0 && self.si_max == 0 {
            self.si_max = 255;
        }
        if self.data_sets == 0 {
            self.data_sets = 1;
        }
        if self.figures == 0 {
            self.figures = 5;
        }
        self
    }

    /// Size of the raw data buffer for one reading.
    pub fn raw_size(&self) -> usize {
        self.data_sets * self.data_type.width()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration == Calibration::Calibrated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub reg: u8,
    #[serde(default)]
    pub data: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct I2cTransport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_address: Option<BusAddress>,
    /// Level pin 1 must be driven to while attached (9V supply on NXT ports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin1: Option<PinState>,
    /// Device needs a settle gap between transactions.
    #[serde(default)]
    pub slow: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalogTransport {
    pub pin: PortPin,
}

/// EV3 UART sensor, reached through the port hosting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartTransport {
    /// Leading modes that report a single value; multiplexer ports expose only these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_view_modes: Option<usize>,
}

impl UartTransport {
    pub fn view_modes(&self, num_modes: usize) -> usize {
        self.num_view_modes.unwrap_or(num_modes).min(num_modes)
    }
}

/// Borrowed view of a descriptor's transport section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport<'a> {
    I2c(&'a I2cTransport),
    Analog(&'a AnalogTransport),
    Uart(&'a UartTransport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: PeripheralKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Modes at or beyond this index are writable outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_read_only_modes: Option<usize>,
    pub modes: Vec<ModeInfo>,
    #[serde(default)]
    pub commands: Vec<CommandInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i2c: Option<I2cTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analog: Option<AnalogTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uart: Option<UartTransport>,
    /// Motor tuning table entry for motor channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor: Option<String>,
}

impl PeripheralDescriptor {
    pub fn num_modes(&self) -> usize {
        self.modes.len()
    }

    pub fn num_read_only_modes(&self) -> usize {
        self.num_read_only_modes.unwrap_or(self.modes.len())
    }

    pub fn is_writable_mode(&self, index: usize) -> bool {
        index >= self.num_read_only_modes() && index < self.modes.len()
    }

    pub fn mode_index(&self, name: &str) -> Option<usize> {
        self.modes.iter().position(|m| m.name == name)
    }

    pub fn command_index(&self, name: &str) -> Option<usize> {
        self.commands.iter().position(|c| c.name == name)
    }

    pub fn transport(&self) -> Transport<'_> {
        match (&self.i2c, &self.analog, &self.uart) {
            (_, Some(analog), _) => Transport::Analog(analog),
            (_, None, Some(uart)) => Transport::Uart(uart),
            (Some(i2c), None, None) => Transport::I2c(i2c),
            (None, None, None) => Transport::I2c(&NO_I2C),
        }
    }

    pub fn pin1(&self) -> Option<PinState> {
        self.i2c.as_ref().and_then(|t| t.pin1)
    }

    pub fn normalized(mut self) -> Self {
        self.modes = self.modes.into_iter().map(ModeInfo::normalized).collect();
        self
    }

    /// Check structural invariants of a normalized descriptor.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Descriptor(format!("{}: {msg}", self.id)));
        if self.id.trim().is_empty() {
            return Err(Error::Descriptor("empty descriptor id".to_string()));
        }
        if self.modes.is_empty() {
            return fail("at least one mode is required".to_string());
        }
        let transports = [self.i2c.is_some(), self.analog.is_some(), self.uart.is_some()];
        if transports.iter().filter(|t| **t).count() != 1 {
            return fail("exactly one of i2c, analog or uart transport is required".to_string());
        }
        if self.uart.is_some() != (self.kind == PeripheralKind::Ev3UartSensor) {
            return fail("uart transport and kind ev3_uart_sensor go together".to_string());
        }
        if let Some(n) = self.uart.as_ref().and_then(|u| u.num_view_modes) {
            if n == 0 || n > self.modes.len() {
                return fail(format!(
                    "num_view_modes {n} must be between 1 and {} modes",
                    self.modes.len()
                ));
            }
            if let Some(mode) = self.modes[..n].iter().find(|m| m.data_sets != 1) {
                return fail(format!("view mode {} reports more than one value", mode.name));
            }
        }
        if let Some(n) = self.num_read_only_modes {
            if n > self.modes.len() {
                return fail(format!(
                    "num_read_only_modes {n} exceeds {} modes",
                    self.modes.len()
                ));
            }
        }
        let mut names = HashSet::new();
        for mode in &self.modes {
            if !names.insert(mode.name.as_str()) {
                return fail(format!("duplicate mode {}", mode.name));
            }
            if mode.raw_size() > MAX_BLOCK_LEN {
                return fail(format!(
                    "mode {} reads {} bytes, more than one transfer",
                    mode.name,
                    mode.raw_size()
                ));
            }
            if mode.scale.is_none() && mode.is_calibrated() && mode.raw_min == mode.raw_max {
                return fail(format!(
                    "mode {} is calibrated but raw_min == raw_max",
                    mode.name
                ));
            }
        }
        let mut names = HashSet::new();
        for cmd in &self.commands {
            if !names.insert(cmd.name.as_str()) {
                return fail(format!("duplicate command {}", cmd.name));
            }
        }
        Ok(())
    }
}

static NO_I2C: I2cTransport = I2cTransport {
    default_address: None,
    pin1: None,
    slow: false,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderPolarity {
    #[default]
    Normal,
    Inversed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidGains {
    #[serde(default)]
    pub kp: u32,
    #[serde(default)]
    pub ki: u32,
    #[serde(default)]
    pub kd: u32,
}

/// Tuning data for a tacho motor model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorInfo {
    pub id: String,
    pub name: String,
    /// Encoder samples averaged for speed, by speed band.
    pub samples_for_speed: [u32; 4],
    pub speed_pid: PidGains,
    pub max_us_per_sample: u32,
    pub max_speed: u32,
    pub count_per_rot: u32,
    #[serde(default)]
    pub encoder_polarity: EncoderPolarity,
}
