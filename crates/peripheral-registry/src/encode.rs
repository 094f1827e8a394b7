use crate::decode::{span_of, RawValue};
use crate::{DataType, Error, ModeInfo, Result};

/// Encode values into their raw byte form; the inverse of [`crate::decode`].
pub fn encode(values: &[RawValue], data_type: DataType) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(values.len() * data_type.width());
    for value in values {
        encode_one(*value, data_type, &mut out)?;
    }
    Ok(out)
}

fn encode_one(value: RawValue, data_type: DataType, out: &mut Vec<u8>) -> Result<()> {
    let int = match (value, data_type.int_range()) {
        (RawValue::Float(f), None) => {
            out.extend_from_slice(&f.to_le_bytes());
            return Ok(());
        }
        (RawValue::Int(v), None) => {
            out.extend_from_slice(&(v as f32).to_le_bytes());
            return Ok(());
        }
        (RawValue::Int(v), Some(range)) => checked(v as f64, v, range, data_type)?,
        (RawValue::Float(f), Some(range)) => {
            let rounded = f64::from(f).round();
            checked(rounded, rounded as i64, range, data_type)?
        }
    };
    match data_type {
        DataType::U8 | DataType::S8 => out.push(int as u8),
        DataType::U16 | DataType::S16 => out.extend_from_slice(&(int as u16).to_le_bytes()),
        DataType::U16Be | DataType::S16Be => out.extend_from_slice(&(int as u16).to_be_bytes()),
        DataType::U32 | DataType::S32 => out.extend_from_slice(&(int as u32).to_le_bytes()),
        DataType::U32Be | DataType::S32Be => out.extend_from_slice(&(int as u32).to_be_bytes()),
        DataType::Float => {}
    }
    Ok(())
}

fn checked(value: f64, int: i64, (min, max): (i64, i64), data_type: DataType) -> Result<i64> {
    if value.is_finite() && int >= min && int <= max {
        Ok(int)
    } else {
        Err(Error::OutOfRange { value, data_type })
    }
}

/// Inverse linear map from physical units to a raw value, clamped to the raw range.
pub fn from_si(si: f64, mode: &ModeInfo) -> Result<RawValue> {
    if mode.si_max == mode.si_min {
        return Err(Error::DegenerateScale {
            mode: mode.name.clone(),
            bound: "si",
            value: mode.si_min,
        });
    }
    let fixed = si * 10f64.powi(i32::from(mode.decimals));
    let raw = mode.raw_min as f64
        + (fixed - mode.si_min as f64) * span_of(mode.raw_min, mode.raw_max)
            / span_of(mode.si_min, mode.si_max);
    let lo = mode.raw_min.min(mode.raw_max) as f64;
    let hi = mode.raw_min.max(mode.raw_max) as f64;
    let clamped = raw.clamp(lo, hi);
    Ok(match mode.data_type {
        DataType::Float => RawValue::Float(clamped as f32),
        _ => RawValue::Int(clamped.round() as i64),
    })
}
