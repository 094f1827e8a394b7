//! peripheral-registry: descriptor catalog and driver engine for port peripherals
//!
//! Sensors, servo controllers and motor multiplexers are described by YAML tables of
//! modes and commands. The engine drives any of them through the same register
//! protocol; the few models that need more get per-kind hooks.

mod types;
pub use types::*;

mod error;
pub use error::{Error, Result};

mod kinds;
pub use kinds::PeripheralKind;

pub mod hooks;
pub use hooks::{DriverContext, HookFlow, PeripheralHooks, SmuxRunState};

mod scale;
pub use scale::{ScaleFn, ScaleInput};

mod decode;
pub use decode::{decode, decode_value, linear_fixed, pct_value, si_value, to_pct, to_si, RawValue};

mod encode;
pub use encode::{encode, from_si};

mod peripheral;
pub use peripheral::{LinkState, Peripheral, PeripheralId, DEFAULT_POLL_MS, MIN_POLL_MS};

mod engine;
pub use engine::Selector;

mod drivers;
pub use drivers::{servo_rate_register_value, MotorChannel, ServoChannel};

mod catalog;
pub use catalog::{
    load_descriptor_file, load_descriptors_dir, parse_descriptor_str, Catalog, DescriptorFile,
};

mod lifecycle;
pub use lifecycle::{PeripheralManager, POWER_UP_SETTLE};

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};
