use crate::decode::{decode_value, linear_fixed};
use crate::hooks::DriverContext;
use crate::{Error, ModeInfo, Result};
use serde::{Deserialize, Serialize};

/// Custom raw-to-SI transforms named by descriptor modes.
///
/// Each returns a fixed-point value in the mode's `decimals`; the engine applies
/// the decimal shift afterwards, exactly as for the linear map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFn {
    /// Tilt byte to degrees through an asin lookup table.
    MsImuTilt,
    /// Accelerometer word times the range factor held in the driver context.
    MiXg1300lAccel,
    /// Servo rate register to milliseconds per full sweep.
    MsServoRate,
    /// Touch pin voltage to pressed/released.
    Ev3Touch,
}

/// Everything a scale function may look at
pub struct ScaleInput<'a> {
    pub raw: &'a [u8],
    pub index: usize,
    pub mode: &'a ModeInfo,
    pub context: &'a DriverContext,
}

// rad2deg(asin(x / 128)) for every tilt byte
const MS_IMU_TILT_TO_DEG: [u8; 256] = [
    0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 4, 5, 5, 6, 6, 7,
    7, 8, 8, 9, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14,
    14, 15, 15, 16, 16, 17, 17, 18, 18, 19, 19, 20, 20, 21, 21, 22,
    22, 23, 23, 23, 24, 24, 25, 25, 26, 26, 27, 27, 28, 28, 29, 29,
    30, 31, 31, 32, 32, 33, 33, 34, 34, 35, 35, 36, 36, 37, 38, 38,
    39, 39, 40, 40, 41, 42, 42, 43, 43, 44, 45, 45, 46, 47, 47, 48,
    49, 49, 50, 51, 51, 52, 53, 54, 54, 55, 56, 57, 58, 58, 59, 60,
    61, 62, 63, 64, 65, 66, 67, 68, 70, 71, 72, 74, 76, 78, 80, 83,
    90, 97, 100, 102, 104, 106, 108, 109, 110, 112, 113, 114, 115, 116, 117, 118,
    119, 120, 121, 122, 122, 123, 124, 125, 126, 126, 127, 128, 129, 129, 130, 131,
    131, 132, 133, 133, 134, 135, 135, 136, 137, 137, 138, 138, 139, 140, 140, 141,
    141, 142, 142, 143, 144, 144, 145, 145, 146, 146, 147, 147, 148, 148, 149, 149,
    150, 151, 151, 152, 152, 153, 153, 154, 154, 155, 155, 156, 156, 157, 157, 157,
    158, 158, 159, 159, 160, 160, 161, 161, 162, 162, 163, 163, 164, 164, 165, 165,
    166, 166, 166, 167, 167, 168, 168, 169, 169, 170, 170, 171, 171, 171, 172, 172,
    173, 173, 174, 174, 175, 175, 176, 176, 176, 177, 177, 178, 178, 179, 179, 180,
];

const SERVO_RATE_NUMERATOR: i64 = 24000;
const TOUCH_PRESSED_MV: f64 = 2500.0;

impl ScaleFn {
    pub fn apply(self, input: &ScaleInput<'_>) -> Result<f64> {
        match self {
            ScaleFn::MsImuTilt => {
                let byte = input.raw.get(input.index).ok_or_else(|| {
                    Error::ScaleError(format!(
                        "tilt index {} outside {}-byte reading",
                        input.index,
                        input.raw.len()
                    ))
                })?;
                Ok(f64::from(MS_IMU_TILT_TO_DEG[usize::from(*byte)]))
            }
            ScaleFn::MiXg1300lAccel => {
                // in ALL the first two values are angle and rate, scaled linearly
                if input.mode.name == "ALL" && input.index < 2 {
                    let raw = read_value(input)?;
                    return linear_fixed(raw, input.mode);
                }
                let factor = match input.context {
                    DriverContext::Xg1300l { accel_factor } => *accel_factor,
                    other => {
                        return Err(Error::ScaleError(format!(
                            "accelerometer scale needs a range factor, context is {other:?}"
                        )))
                    }
                };
                Ok(read_value(input)? * factor as f64)
            }
            ScaleFn::MsServoRate => {
                let raw = read_value(input)? as i64;
                if raw == 0 {
                    Ok(0.0)
                } else {
                    Ok((SERVO_RATE_NUMERATOR / raw) as f64)
                }
            }
            ScaleFn::Ev3Touch => {
                let millivolts = read_value(input)?;
                Ok(if millivolts > TOUCH_PRESSED_MV { 1.0 } else { 0.0 })
            }
        }
    }
}

fn read_value(input: &ScaleInput<'_>) -> Result<f64> {
    decode_value(input.raw, input.mode.data_type, input.index)
        .map(|v| v.as_f64())
        .map_err(|e| Error::ScaleError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    fn input<'a>(raw: &'a [u8], index: usize, mode: &'a ModeInfo, ctx: &'a DriverContext) -> ScaleInput<'a> {
        ScaleInput {
            raw,
            index,
            mode,
            context: ctx,
        }
    }

    #[test]
    fn test_tilt_table() {
        let mode = ModeInfo::named("TILT").normalized();
        let ctx = DriverContext::None;
        let raw = [0u8, 128, 255];
        assert_eq!(ScaleFn::MsImuTilt.apply(&input(&raw, 0, &mode, &ctx)).unwrap(), 0.0);
        assert_eq!(ScaleFn::MsImuTilt.apply(&input(&raw, 1, &mode, &ctx)).unwrap(), 90.0);
        assert_eq!(ScaleFn::MsImuTilt.apply(&input(&raw, 2, &mode, &ctx)).unwrap(), 180.0);
        assert!(matches!(
            ScaleFn::MsImuTilt.apply(&input(&raw, 3, &mode, &ctx)),
            Err(Error::ScaleError(_))
        ));
    }

    #[test]
    fn test_xg1300l_factor() {
        let mut mode = ModeInfo::named("ACCEL");
        mode.data_type = DataType::S16;
        mode.data_sets = 3;
        let mode = mode.normalized();
        let raw = [0x10, 0x00, 0xF0, 0xFF, 0x00, 0x00];

        let ctx = DriverContext::Xg1300l { accel_factor: 4 };
        assert_eq!(ScaleFn::MiXg1300lAccel.apply(&input(&raw, 0, &mode, &ctx)).unwrap(), 64.0);
        assert_eq!(ScaleFn::MiXg1300lAccel.apply(&input(&raw, 1, &mode, &ctx)).unwrap(), -64.0);

        let none = DriverContext::None;
        assert!(ScaleFn::MiXg1300lAccel.apply(&input(&raw, 0, &mode, &none)).is_err());
    }

    #[test]
    fn test_xg1300l_all_mode_is_linear_for_first_values() {
        let mut mode = ModeInfo::named("ALL");
        mode.data_type = DataType::S16;
        mode.data_sets = 5;
        let mode = mode.normalized();
        let raw = [100, 0, 50, 0, 10, 0, 0, 0, 0, 0];
        let ctx = DriverContext::Xg1300l { accel_factor: 2 };
        assert_eq!(ScaleFn::MiXg1300lAccel.apply(&input(&raw, 0, &mode, &ctx)).unwrap(), 100.0);
        assert_eq!(ScaleFn::MiXg1300lAccel.apply(&input(&raw, 1, &mode, &ctx)).unwrap(), 50.0);
        assert_eq!(ScaleFn::MiXg1300lAccel.apply(&input(&raw, 2, &mode, &ctx)).unwrap(), 20.0);
    }

    #[test]
    fn test_servo_rate() {
        let mode = ModeInfo::named("RATE").normalized();
        let ctx = DriverContext::None;
        assert_eq!(ScaleFn::MsServoRate.apply(&input(&[0], 0, &mode, &ctx)).unwrap(), 0.0);
        assert_eq!(ScaleFn::MsServoRate.apply(&input(&[1], 0, &mode, &ctx)).unwrap(), 24000.0);
        assert_eq!(ScaleFn::MsServoRate.apply(&input(&[255], 0, &mode, &ctx)).unwrap(), 94.0);
    }

    #[test]
    fn test_touch_threshold() {
        let mut mode = ModeInfo::named("TOUCH");
        mode.data_type = DataType::S32;
        let mode = mode.normalized();
        let ctx = DriverContext::None;
        let pressed = 4800i32.to_le_bytes();
        let released = 90i32.to_le_bytes();
        assert_eq!(ScaleFn::Ev3Touch.apply(&input(&pressed, 0, &mode, &ctx)).unwrap(), 1.0);
        assert_eq!(ScaleFn::Ev3Touch.apply(&input(&released, 0, &mode, &ctx)).unwrap(), 0.0);
    }
}
