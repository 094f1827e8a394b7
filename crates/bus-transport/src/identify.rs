use crate::{BusAddress, DeviceIds, Result, SharedBus};
use std::thread;
use std::time::Duration;
use tracing::debug;

pub const FW_VERSION_REG: u8 = 0x00;
pub const VENDOR_ID_REG: u8 = 0x08;
pub const PRODUCT_ID_REG: u8 = 0x10;
pub const ID_STRING_LEN: usize = 8;

// HiTechnic firmware prefixes the version string with this byte.
const FW_VERSION_PREFIX: u8 = 0xFD;

/// Read the vendor and product identification strings of a device.
///
/// Some devices are asleep after power-up and NAK the first transfer, so the vendor
/// read is attempted twice. Slow devices need a gap between the two reads.
pub fn identify(bus: &SharedBus, addr: BusAddress) -> Result<DeviceIds> {
    let mut vendor = [0u8; ID_STRING_LEN];
    let mut tries = 2;
    loop {
        tries -= 1;
        match bus.read_block(addr, VENDOR_ID_REG, &mut vendor) {
            Ok(()) => break,
            Err(e) if tries == 0 => return Err(e),
            Err(e) => {
                debug!(%addr, error = %e, "vendor id read failed, retrying");
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    thread::sleep(Duration::from_millis(1));
    let mut product = [0u8; ID_STRING_LEN];
    bus.read_block(addr, PRODUCT_ID_REG, &mut product)?;

    Ok(DeviceIds {
        vendor_id: id_string(&vendor),
        product_id: id_string(&product),
    })
}

/// Read the firmware version string at register 0x00.
pub fn read_fw_version(bus: &SharedBus, addr: BusAddress) -> Result<String> {
    let mut raw = [0u8; ID_STRING_LEN];
    bus.read_block(addr, FW_VERSION_REG, &mut raw)?;
    let text = match raw.split_first() {
        Some((&FW_VERSION_PREFIX, rest)) => rest,
        _ => &raw[..],
    };
    Ok(id_string(text))
}

fn id_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}
