//! EV3 UART sensors hosted on a multiplexer port.

use super::smux::{read_bank, select_bank_mode};
use crate::hooks::{HookFlow, PeripheralHooks};
use crate::{Peripheral, Result};

/// LEGO EV3 color, ultrasonic, gyro and infrared sensors
pub(super) struct Ev3UartSensor;

impl PeripheralHooks for Ev3UartSensor {
    fn pre_set_mode(&self, dev: &mut Peripheral, mode: usize) -> Result<HookFlow> {
        // the multiplexer talks UART to the sensor on our behalf
        select_bank_mode(dev, mode)?;
        Ok(HookFlow::Handled)
    }

    fn poll(&self, dev: &mut Peripheral) -> Result<()> {
        read_bank(dev)
    }
}
