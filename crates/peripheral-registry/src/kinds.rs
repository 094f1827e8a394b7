use crate::drivers;
use crate::hooks::PeripheralHooks;
use serde::{Deserialize, Serialize};

/// Driver behavior attached to a descriptor.
///
/// Most peripherals are fully described by their tables and use `Generic`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeripheralKind {
    #[default]
    Generic,
    #[serde(rename = "ms_8ch_servo")]
    Ms8chServo,
    #[serde(rename = "ms_8ch_servo_channel")]
    Ms8chServoChannel,
    MsAbsoluteImu,
    MiXg1300l,
    HtNxtSmux,
    HtNxtSmuxPort,
    MsEv3Smux,
    MsEv3SmuxPort,
    MsNxtmmx,
    MsNxtmmxMotor,
    Ev3UartSensor,
}

impl PeripheralKind {
    pub fn hooks(self) -> &'static dyn PeripheralHooks {
        drivers::hooks_for(self)
    }

    /// Whether this kind only exists as a child of another peripheral.
    pub fn is_child(self) -> bool {
        matches!(
            self,
            PeripheralKind::Ms8chServoChannel
                | PeripheralKind::HtNxtSmuxPort
                | PeripheralKind::MsEv3SmuxPort
                | PeripheralKind::MsNxtmmxMotor
                | PeripheralKind::Ev3UartSensor
        )
    }
}
