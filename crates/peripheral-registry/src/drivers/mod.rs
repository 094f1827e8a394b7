//! Vendor-specific behavior for the kinds that need more than their tables.

mod ev3_uart;
mod imu;
mod nxtmmx;
mod servo;
mod smux;

pub use nxtmmx::MotorChannel;
pub use servo::{servo_rate_register_value, ServoChannel};

use crate::hooks::{DefaultHooks, PeripheralHooks};
use crate::PeripheralKind;

pub(crate) fn hooks_for(kind: PeripheralKind) -> &'static dyn PeripheralHooks {
    match kind {
        PeripheralKind::Generic => &DefaultHooks,
        PeripheralKind::Ms8chServo => &servo::Ms8chServo,
        PeripheralKind::Ms8chServoChannel => &servo::Ms8chServoChannel,
        PeripheralKind::MsAbsoluteImu => &imu::MsAbsoluteImu,
        PeripheralKind::MiXg1300l => &imu::MiXg1300l,
        PeripheralKind::HtNxtSmux => &smux::HtNxtSmux,
        PeripheralKind::HtNxtSmuxPort => &smux::HtNxtSmuxPort,
        PeripheralKind::MsEv3Smux => &smux::MsEv3Smux,
        PeripheralKind::MsEv3SmuxPort => &smux::MsEv3SmuxPort,
        PeripheralKind::MsNxtmmx => &nxtmmx::MsNxtmmx,
        PeripheralKind::MsNxtmmxMotor => &nxtmmx::MsNxtmmxMotor,
        PeripheralKind::Ev3UartSensor => &ev3_uart::Ev3UartSensor,
    }
}
