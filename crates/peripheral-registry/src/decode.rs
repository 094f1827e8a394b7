use crate::hooks::DriverContext;
use crate::scale::ScaleInput;
use crate::{DataType, Error, ModeInfo, Result};
use serde::Serialize;

/// One decoded value from a raw data buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Int(i64),
    Float(f32),
}

impl RawValue {
    pub fn as_f64(self) -> f64 {
        match self {
            RawValue::Int(v) => v as f64,
            RawValue::Float(v) => f64::from(v),
        }
    }
}

/// Decode `data_sets` consecutive values of `data_type` from the front of `buf`.
pub fn decode(buf: &[u8], data_type: DataType, data_sets: usize) -> Result<Vec<RawValue>> {
    let width = data_type.width();
    let needed = data_sets * width;
    if buf.len() < needed {
        return Err(Error::BufferTooShort {
            needed,
            actual: buf.len(),
        });
    }
    Ok(buf[..needed]
        .chunks_exact(width)
        .map(|chunk| decode_one(chunk, data_type))
        .collect())
}

/// Decode the value at position `index`.
pub fn decode_value(buf: &[u8], data_type: DataType, index: usize) -> Result<RawValue> {
    let width = data_type.width();
    let start = index * width;
    let chunk = buf.get(start..start + width).ok_or(Error::BufferTooShort {
        needed: start + width,
        actual: buf.len(),
    })?;
    Ok(decode_one(chunk, data_type))
}

fn decode_one(chunk: &[u8], data_type: DataType) -> RawValue {
    match data_type {
        DataType::U8 => RawValue::Int(i64::from(chunk[0])),
        DataType::S8 => RawValue::Int(i64::from(chunk[0] as i8)),
        DataType::U16 => RawValue::Int(i64::from(u16::from_le_bytes(bytes(chunk)))),
        DataType::S16 => RawValue::Int(i64::from(i16::from_le_bytes(bytes(chunk)))),
        DataType::U16Be => RawValue::Int(i64::from(u16::from_be_bytes(bytes(chunk)))),
        DataType::S16Be => RawValue::Int(i64::from(i16::from_be_bytes(bytes(chunk)))),
        DataType::U32 => RawValue::Int(i64::from(u32::from_le_bytes(bytes(chunk)))),
        DataType::S32 => RawValue::Int(i64::from(i32::from_le_bytes(bytes(chunk)))),
        DataType::U32Be => RawValue::Int(i64::from(u32::from_be_bytes(bytes(chunk)))),
        DataType::S32Be => RawValue::Int(i64::from(i32::from_be_bytes(bytes(chunk)))),
        DataType::Float => RawValue::Float(f32::from_le_bytes(bytes(chunk))),
    }
}

// Chunks always carry exactly `width` bytes.
fn bytes<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    for (dst, src) in out.iter_mut().zip(chunk) {
        *dst = *src;
    }
    out
}

/// Linear raw-to-SI map, rounded to the fixed-point integer domain.
pub fn linear_fixed(raw: f64, mode: &ModeInfo) -> Result<f64> {
    let span = raw_span(mode)?;
    let si = mode.si_min as f64 + (raw - mode.raw_min as f64) * span_of(mode.si_min, mode.si_max) / span;
    Ok(si.round())
}

/// Scale a raw value through the mode's linear map into physical units.
pub fn si_value(raw: f64, mode: &ModeInfo) -> Result<f64> {
    if !mode.is_calibrated() {
        return Ok(raw);
    }
    Ok(shift_decimals(linear_fixed(raw, mode)?, mode.decimals))
}

/// Physical value of the `index`-th reading in `raw`.
pub fn to_si(raw: &[u8], index: usize, mode: &ModeInfo, context: &DriverContext) -> Result<f64> {
    if let Some(scale) = mode.scale {
        let fixed = scale.apply(&ScaleInput {
            raw,
            index,
            mode,
            context,
        })?;
        return Ok(shift_decimals(fixed, mode.decimals));
    }
    let value = decode_value(raw, mode.data_type, index)?.as_f64();
    si_value(value, mode)
}

/// Percentage of the `index`-th reading in `raw`.
pub fn to_pct(raw: &[u8], index: usize, mode: &ModeInfo) -> Result<i64> {
    let value = decode_value(raw, mode.data_type, index)?.as_f64();
    pct_value(value, mode)
}

pub fn pct_value(raw: f64, mode: &ModeInfo) -> Result<i64> {
    let span = raw_span(mode)?;
    let pct = mode.pct_min as f64
        + (raw - mode.raw_min as f64) * span_of(mode.pct_min, mode.pct_max) / span;
    Ok(pct.round() as i64)
}

fn raw_span(mode: &ModeInfo) -> Result<f64> {
    if mode.raw_max == mode.raw_min {
        return Err(Error::DegenerateScale {
            mode: mode.name.clone(),
            bound: "raw",
            value: mode.raw_min,
        });
    }
    Ok(span_of(mode.raw_min, mode.raw_max))
}

/// Signed width of `min..max`; bounds may span the whole i64 range.
pub(crate) fn span_of(min: i64, max: i64) -> f64 {
    max as f64 - min as f64
}

pub(crate) fn shift_decimals(fixed: f64, decimals: u8) -> f64 {
    if decimals == 0 {
        fixed
    } else {
        fixed / 10f64.powi(i32::from(decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Calibration;

    fn mode(raw: (i64, i64), si: (i64, i64), decimals: u8) -> ModeInfo {
        let mut m = ModeInfo::named("TEST");
        m.raw_min = raw.0;
        m.raw_max = raw.1;
        m.si_min = si.0;
        m.si_max = si.1;
        m.decimals = decimals;
        m.normalized()
    }

    #[test]
    fn test_decode_widths_and_endianness() {
        let buf = [0x34, 0x12, 0xFF, 0xFF];
        assert_eq!(
            decode(&buf, DataType::U16, 2).unwrap(),
            vec![RawValue::Int(0x1234), RawValue::Int(0xFFFF)]
        );
        assert_eq!(
            decode(&buf, DataType::S16Be, 2).unwrap(),
            vec![RawValue::Int(0x3412), RawValue::Int(-1)]
        );
        assert_eq!(decode(&buf, DataType::S8, 1).unwrap(), vec![RawValue::Int(0x34)]);
        assert_eq!(
            decode(&[0xFE, 0xFF, 0xFF, 0xFF], DataType::S32, 1).unwrap(),
            vec![RawValue::Int(-2)]
        );
        assert_eq!(
            decode(&1.5f32.to_le_bytes(), DataType::Float, 1).unwrap(),
            vec![RawValue::Float(1.5)]
        );
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = decode(&[0, 1, 2], DataType::U16, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferTooShort {
                needed: 4,
                actual: 3
            }
        ));
        assert!(decode_value(&[0, 1, 2], DataType::U16, 1).is_err());
    }

    #[test]
    fn test_linear_scale_points() {
        let m = mode((0, 255), (0, 100), 0);
        assert_eq!(si_value(128.0, &m).unwrap(), 50.0);
        assert_eq!(si_value(0.0, &m).unwrap(), 0.0);
        assert_eq!(si_value(255.0, &m).unwrap(), 100.0);
    }

    #[test]
    fn test_decimal_shift() {
        // 0..255 raw onto 0..1000 tenths
        let m = mode((0, 255), (0, 1000), 1);
        assert_eq!(si_value(255.0, &m).unwrap(), 100.0);
        assert!((si_value(128.0, &m).unwrap() - 50.2).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_scale() {
        let m = mode((30400, 30400), (0, 3000), 0);
        assert!(matches!(
            si_value(30400.0, &m),
            Err(Error::DegenerateScale { value: 30400, .. })
        ));
        assert!(pct_value(30400.0, &m).is_err());
    }

    #[test]
    fn test_linear_monotonic_within_bounds() {
        let cases = [
            mode((0, 255), (0, 100), 0),
            mode((30400, 29400), (0, 3000), 0),
            mode((127, 255), (4700, 9400), 3),
            mode((-32768, 32767), (-32768, 32767), 0),
        ];
        for m in &cases {
            let (lo, hi) = (m.raw_min.min(m.raw_max), m.raw_min.max(m.raw_max));
            let si_lo = m.si_min.min(m.si_max) as f64 / 10f64.powi(i32::from(m.decimals));
            let si_hi = m.si_min.max(m.si_max) as f64 / 10f64.powi(i32::from(m.decimals));
            let increasing = (m.raw_max > m.raw_min) == (m.si_max > m.si_min);
            let step = ((hi - lo) / 97).max(1);
            let mut prev: Option<f64> = None;
            let mut raw = lo;
            while raw <= hi {
                let si = si_value(raw as f64, m).unwrap();
                assert!(si >= si_lo - 1e-9 && si <= si_hi + 1e-9, "{si} outside bounds");
                if let Some(p) = prev {
                    if increasing {
                        assert!(si >= p);
                    } else {
                        assert!(si <= p);
                    }
                }
                prev = Some(si);
                raw += step;
            }
        }
    }

    #[test]
    fn test_full_i64_bounds_do_not_overflow() {
        let m = mode((i64::MIN, i64::MAX), (i64::MIN, i64::MAX), 0);
        assert_eq!(si_value(0.0, &m).unwrap(), 0.0);
        assert_eq!(pct_value(i64::MAX as f64, &m).unwrap(), 100);

        let narrow = mode((0, 255), (i64::MIN, i64::MAX), 0);
        assert_eq!(si_value(0.0, &narrow).unwrap(), i64::MIN as f64);
        assert_eq!(crate::from_si(0.0, &narrow).unwrap(), RawValue::Int(128));
    }

    #[test]
    fn test_uncalibrated_passthrough() {
        let mut m = mode((30400, 30400), (0, 3000), 0);
        m.calibration = Calibration::Uncalibrated;
        assert_eq!(si_value(29876.0, &m).unwrap(), 29876.0);
        let raw = 29876u16.to_le_bytes();
        m.data_type = DataType::U16;
        assert_eq!(to_si(&raw, 0, &m, &DriverContext::None).unwrap(), 29876.0);
    }

    #[test]
    fn test_pct() {
        let mut m = mode((0, 255), (0, 255), 0);
        m.pct_min = -100;
        m.pct_max = 100;
        assert_eq!(pct_value(0.0, &m).unwrap(), -100);
        assert_eq!(pct_value(255.0, &m).unwrap(), 100);
        assert_eq!(to_pct(&[128], 0, &m).unwrap(), 0);
    }

    #[test]
    fn test_to_si_indexes_into_buffer() {
        let mut m = mode((0, 1000), (0, 1000), 0);
        m.data_type = DataType::S16;
        m.data_sets = 3;
        let raw = [1, 0, 2, 0, 0xFD, 0xFF];
        let ctx = DriverContext::None;
        assert_eq!(to_si(&raw, 1, &m, &ctx).unwrap(), 2.0);
        assert_eq!(to_si(&raw, 2, &m, &ctx).unwrap(), -3.0);
    }
}
