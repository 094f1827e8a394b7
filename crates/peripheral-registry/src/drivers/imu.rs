//! Inertial sensors whose commands change the meaning of other modes.

use crate::hooks::{ChildSpawner, DriverContext, PeripheralHooks};
use crate::{Peripheral, Result};
use tracing::debug;

/// mindsensors.com Absolute-IMU
pub(super) struct MsAbsoluteImu;

impl PeripheralHooks for MsAbsoluteImu {
    fn post_send_command(&self, dev: &mut Peripheral, command: usize) -> Result<()> {
        // gyro sensitivity follows the accelerometer range
        let (raw_max, si_max) = match dev.descriptor.commands[command].name.as_str() {
            "ACCEL-2G" => (10000, 875),
            "ACCEL-4G" => (1000, 175),
            "ACCEL-8G" | "ACCEL-16G" => (1000, 700),
            _ => return Ok(()),
        };
        if let Some(gyro) = dev.modes.iter_mut().find(|m| m.name == "GYRO") {
            gyro.raw_max = raw_max;
            gyro.si_max = si_max;
        }
        debug!(port = %dev.port, raw_max, si_max, "gyro rescaled");
        Ok(())
    }
}

/// Microinfinity CruizCore XG1300L
pub(super) struct MiXg1300l;

impl PeripheralHooks for MiXg1300l {
    fn probe(&self, dev: &mut Peripheral, _children: &mut ChildSpawner) -> Result<()> {
        dev.set_context(DriverContext::Xg1300l { accel_factor: 1 });
        Ok(())
    }

    fn remove(&self, dev: &mut Peripheral) {
        dev.set_context(DriverContext::None);
    }

    fn post_send_command(&self, dev: &mut Peripheral, command: usize) -> Result<()> {
        let factor = match dev.descriptor.commands[command].name.as_str() {
            "RESET" | "ACCEL-2G" => 1,
            "ACCEL-4G" => 2,
            "ACCEL-8G" => 4,
            _ => return Ok(()),
        };
        dev.set_context(DriverContext::Xg1300l {
            accel_factor: factor,
        });
        Ok(())
    }
}
