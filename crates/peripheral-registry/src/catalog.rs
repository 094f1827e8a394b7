use crate::{Error, MotorInfo, PeripheralDescriptor, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const BUILTIN: [(&str, &str); 5] = [
    ("motors.yaml", include_str!("../descriptors/motors.yaml")),
    ("nxt_i2c.yaml", include_str!("../descriptors/nxt_i2c.yaml")),
    ("children.yaml", include_str!("../descriptors/children.yaml")),
    ("ev3_analog.yaml", include_str!("../descriptors/ev3_analog.yaml")),
    ("ev3_uart.yaml", include_str!("../descriptors/ev3_uart.yaml")),
];

/// Contents of one descriptor file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorFile {
    #[serde(default)]
    pub peripherals: Vec<PeripheralDescriptor>,
    #[serde(default)]
    pub motors: Vec<MotorInfo>,
}

/// Immutable lookup table from type id to descriptor.
///
/// Build it once, then share it behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    peripherals: BTreeMap<String, Arc<PeripheralDescriptor>>,
    motors: BTreeMap<String, MotorInfo>,
}

impl Catalog {
    /// The descriptors compiled into the crate.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Catalog::default();
        for (name, text) in BUILTIN {
            let file = parse_descriptor_str(text)
                .map_err(|e| Error::Descriptor(format!("builtin {name}: {e:#}")))?;
            catalog.merge(file)?;
        }
        Ok(catalog)
    }

    /// The builtin descriptors extended with every file in `dir`.
    pub fn builtin_with_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut catalog = Catalog::builtin()?;
        catalog.merge_dir(dir)?;
        Ok(catalog)
    }

    /// Add the entries of `file`. Nothing is added if any entry is invalid.
    pub fn merge(&mut self, file: DescriptorFile) -> Result<()> {
        let mut motor_ids = HashSet::new();
        for motor in &file.motors {
            if self.motors.contains_key(&motor.id) || !motor_ids.insert(motor.id.as_str()) {
                return Err(Error::Descriptor(format!("duplicate motor {}", motor.id)));
            }
        }

        let mut staged = Vec::with_capacity(file.peripherals.len());
        let mut ids = HashSet::new();
        for desc in file.peripherals {
            let desc = desc.normalized();
            desc.validate()?;
            if self.peripherals.contains_key(&desc.id) || !ids.insert(desc.id.clone()) {
                return Err(Error::Descriptor(format!("duplicate peripheral {}", desc.id)));
            }
            if let Some(motor) = &desc.motor {
                if !self.motors.contains_key(motor) && !motor_ids.contains(motor.as_str()) {
                    return Err(Error::Descriptor(format!(
                        "{}: unknown motor {motor}",
                        desc.id
                    )));
                }
            }
            staged.push(desc);
        }

        for motor in file.motors {
            self.motors.insert(motor.id.clone(), motor);
        }
        for desc in staged {
            debug!(
                type_id = %desc.id,
                kind = ?desc.kind,
                modes = desc.modes.len(),
                "descriptor loaded"
            );
            self.peripherals.insert(desc.id.clone(), Arc::new(desc));
        }
        Ok(())
    }

    /// Merge every `.yml`/`.yaml` file in `dir`, in file name order.
    pub fn merge_dir(&mut self, dir: impl AsRef<Path>) -> anyhow::Result<()> {
        for path in descriptor_paths(dir.as_ref())? {
            let file = load_descriptor_file(&path)?;
            self.merge(file)
                .with_context(|| format!("merging descriptors: {}", path.display()))?;
        }
        Ok(())
    }

    pub fn lookup(&self, type_id: &str) -> Result<&Arc<PeripheralDescriptor>> {
        self.peripherals
            .get(type_id)
            .ok_or_else(|| Error::UnknownType(type_id.to_string()))
    }

    /// Descriptor whose identification strings match, ignoring surrounding whitespace.
    pub fn find_by_ids(
        &self,
        vendor_id: &str,
        product_id: &str,
    ) -> Option<&Arc<PeripheralDescriptor>> {
        let (vendor_id, product_id) = (vendor_id.trim(), product_id.trim());
        self.peripherals.values().find(|d| {
            d.vendor_id.as_deref().map(str::trim) == Some(vendor_id)
                && d.product_id.as_deref().unwrap_or("").trim() == product_id
        })
    }

    pub fn motor(&self, id: &str) -> Option<&MotorInfo> {
        self.motors.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PeripheralDescriptor>> {
        self.peripherals.values()
    }

    pub fn motors(&self) -> impl Iterator<Item = &MotorInfo> {
        self.motors.values()
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }
}

pub fn parse_descriptor_str(text: &str) -> anyhow::Result<DescriptorFile> {
    let val: Value = serde_yaml::from_str(text).context("parsing yaml")?;
    let file: DescriptorFile = serde_yaml::from_value(val).context("decoding descriptors")?;
    Ok(file)
}

pub fn load_descriptor_file(path: impl AsRef<Path>) -> anyhow::Result<DescriptorFile> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading descriptor: {}", path.display()))?;
    let val: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    let file: DescriptorFile = serde_yaml::from_value(val)
        .with_context(|| format!("decoding descriptor: {}", path.display()))?;
    Ok(file)
}

/// A catalog holding only the descriptors found in `dir`.
pub fn load_descriptors_dir(dir: impl AsRef<Path>) -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::default();
    catalog.merge_dir(dir)?;
    Ok(catalog)
}

fn descriptor_paths(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Calibration, DataType, PeripheralKind, ScaleFn};
    use bus_transport::PinState;
    use std::io::Write;

    const EXTRA: &str = r#"
peripherals:
  - id: test-thermo
    name: Test Thermometer
    vendor_id: "Acme"
    product_id: "Thermo"
    i2c:
      default_address: 0x4C
    modes:
      - name: TEMP
        units: C
        data_type: s16
        raw_min: -1000
        raw_max: 1000
        si_min: -1000
        si_max: 1000
        decimals: 1
        read_reg: 0x42
"#;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.len(), 32);
        for id in [
            "lego-nxt-us",
            "ht-nxt-smux",
            "ms-8ch-servo",
            "ms-8ch-servo-channel",
            "ms-nxtmmx-motor",
            "lego-ev3-touch",
            "lego-ev3-color",
            "lego-ev3-ir",
        ] {
            assert!(catalog.lookup(id).is_ok(), "{id} missing");
        }
        assert_eq!(catalog.motors().count(), 3);
        assert!(matches!(catalog.lookup("nope"), Err(Error::UnknownType(_))));
    }

    #[test]
    fn test_builtin_tables() {
        let catalog = Catalog::builtin().unwrap();

        let us = catalog.lookup("lego-nxt-us").unwrap();
        assert_eq!(us.kind, PeripheralKind::Generic);
        assert_eq!(us.i2c.as_ref().map(|t| t.slow), Some(true));
        assert_eq!(us.pin1(), Some(PinState::High));
        assert_eq!(us.num_read_only_modes(), 2);
        assert_eq!(us.modes[0].si_max, 255);

        let baro = catalog.lookup("ht-nxt-barometric").unwrap();
        assert_eq!(baro.modes[0].calibration, Calibration::Uncalibrated);
        assert_eq!((baro.modes[0].raw_min, baro.modes[0].raw_max), (30400, 29400));

        let imu = catalog.lookup("ms-absolute-imu").unwrap();
        assert_eq!(imu.modes[0].scale, Some(ScaleFn::MsImuTilt));
        assert_eq!(imu.commands[3].data, b'2');

        let mmx = catalog.lookup("ms-nxtmmx").unwrap();
        assert_eq!(mmx.modes[0].si_max, 9435);

        let angle = catalog.lookup("ht-nxt-angle").unwrap();
        assert_eq!(angle.modes[1].data_type, DataType::S32);
        assert_eq!(angle.modes[1].raw_min, i64::from(i32::MIN));

        let color = catalog.lookup("lego-ev3-color").unwrap();
        assert_eq!(color.kind, PeripheralKind::Ev3UartSensor);
        assert_eq!(color.uart.as_ref().and_then(|u| u.num_view_modes), Some(3));
        assert_eq!(color.num_modes(), 6);
        let ir = catalog.lookup("lego-ev3-ir").unwrap();
        assert!(matches!(ir.transport(), crate::Transport::Uart(u) if u.view_modes(ir.num_modes()) == 1));

        let fi = catalog.motor("fi-l12-ev3").unwrap();
        assert_eq!(fi.encoder_polarity, crate::EncoderPolarity::Inversed);
    }

    #[test]
    fn test_find_by_ids_trims() {
        let catalog = Catalog::builtin().unwrap();
        let desc = catalog.find_by_ids("HiTechnc", "SensrMUX ").unwrap();
        assert_eq!(desc.id, "ht-nxt-smux");
        let desc = catalog.find_by_ids(" mndsnsrs", "AbsIMU").unwrap();
        assert_eq!(desc.id, "ms-absolute-imu");
        assert!(catalog.find_by_ids("mndsnsrs", "Nothing").is_none());
        // children carry no identification strings
        assert!(catalog.find_by_ids("", "").is_none());
    }

    #[test]
    fn test_merge_rejects_duplicates_and_bad_refs() {
        let mut catalog = Catalog::builtin().unwrap();
        let extra = parse_descriptor_str(EXTRA).unwrap();
        catalog.merge(extra.clone()).unwrap();
        assert_eq!(catalog.len(), 33);
        assert!(matches!(catalog.merge(extra), Err(Error::Descriptor(_))));

        let mut bad = parse_descriptor_str(EXTRA).unwrap();
        bad.peripherals[0].id = "test-thermo-2".to_string();
        bad.peripherals[0].motor = Some("no-such-motor".to_string());
        assert!(catalog.merge(bad).is_err());
        assert!(catalog.lookup("test-thermo-2").is_err());
    }

    #[test]
    fn test_load_dir_sorted_and_filtered() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut f = fs::File::create(dir.path().join("b_thermo.yaml"))?;
        f.write_all(EXTRA.as_bytes())?;
        fs::write(dir.path().join("notes.txt"), "not a descriptor")?;
        fs::write(
            dir.path().join("a_motors.yml"),
            "motors:\n  - { id: m1, name: M1, samples_for_speed: [1, 2, 3, 4], speed_pid: { kp: 1 }, max_us_per_sample: 1, max_speed: 1, count_per_rot: 1 }\n",
        )?;

        let catalog = load_descriptors_dir(dir.path())?;
        assert_eq!(catalog.len(), 1);
        assert!(catalog.motor("m1").is_some());
        let thermo = catalog.lookup("test-thermo")?;
        assert_eq!(thermo.modes[0].pct_max, 100);

        let merged = Catalog::builtin_with_dir(dir.path())?;
        assert_eq!(merged.len(), 33);
        Ok(())
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "peripherals: [ { id: x } ]").unwrap();
        let err = load_descriptor_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.yaml"));
    }
}
