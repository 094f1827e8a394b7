use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

use bus_transport::{BusAddress, MockBus, SharedBus};
use peripheral_registry as preg;
use preg::{Catalog, MetricsHub, PeripheralManager, Transport};

#[derive(Parser, Debug)]
#[command(
    name = "pr",
    version,
    about = "Peripheral registry CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Extra descriptor directory merged over the builtin catalog
    #[arg(long, global = true)]
    desc_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every known peripheral type
    CatalogList,
    /// Show one descriptor as JSON
    CatalogShow {
        /// Type id, e.g. lego-nxt-us
        #[arg(long = "type")]
        type_id: String,
    },
    /// Validate a descriptor file or a directory of descriptor files
    DescriptorValidate {
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        dir: Option<String>,
        /// Print the normalized descriptors as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Identify a simulated device from its vendor and product strings
    IdentifyMock {
        #[arg(long)]
        vendor: String,
        #[arg(long)]
        product: String,
        /// Bus address (hex)
        #[arg(long, default_value = "0x01")]
        address: String,
    },
    /// Attach a peripheral on the mock bus and poll it
    RunMock {
        /// Type id, e.g. ms-absolute-imu
        #[arg(long = "type")]
        type_id: String,
        /// Port identity, e.g. in1
        #[arg(long, default_value = "in1")]
        port: String,
        /// Bus address (hex); defaults to the descriptor's address
        #[arg(long)]
        address: Option<String>,
        /// Sensor type hosted on the first multiplexer port; it becomes the polled device
        #[arg(long)]
        port_device: Option<String>,
        /// Mode to select by name after attach
        #[arg(long)]
        mode: Option<String>,
        /// Command to send by name after attach
        #[arg(long)]
        command: Option<String>,
        /// Values written to the selected output mode, e.g. 1,2,3
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        write: Vec<f64>,
        /// Number of polls
        #[arg(long, default_value_t = 1u32)]
        polls: u32,
        /// Preload registers: REG=BYTES, e.g. 0x42=2A or 0x53=E8,03
        #[arg(long = "reg")]
        regs: Vec<String>,
        /// Print one JSON record per poll
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Print metrics after the run
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

#[derive(Serialize)]
struct ReadingRecord {
    ts: String,
    port: String,
    type_id: String,
    mode: String,
    units: String,
    raw: String,
    values: Vec<f64>,
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let desc_dir = cli.desc_dir.as_deref();

    match cli.command {
        Commands::CatalogList => catalog_list(desc_dir),
        Commands::CatalogShow { type_id } => catalog_show(desc_dir, &type_id),
        Commands::DescriptorValidate { file, dir, json } => {
            descriptor_validate(file.as_deref(), dir.as_deref(), json)
        }
        Commands::IdentifyMock {
            vendor,
            product,
            address,
        } => identify_mock(desc_dir, &vendor, &product, &address),
        Commands::RunMock {
            type_id,
            port,
            address,
            port_device,
            mode,
            command,
            write,
            polls,
            regs,
            json,
            metrics,
        } => run_mock(
            desc_dir,
            &RunOptions {
                type_id: &type_id,
                port: &port,
                address: address.as_deref(),
                port_device: port_device.as_deref(),
                mode: mode.as_deref(),
                command: command.as_deref(),
                write: &write,
                polls,
                regs: &regs,
                json,
                metrics,
            },
        ),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load_catalog(desc_dir: Option<&str>) -> Result<Catalog> {
    match desc_dir {
        Some(dir) => Catalog::builtin_with_dir(dir),
        None => Ok(Catalog::builtin()?),
    }
}

fn catalog_list(desc_dir: Option<&str>) -> Result<()> {
    let catalog = load_catalog(desc_dir)?;
    for d in catalog.iter() {
        let transport = match d.transport() {
            Transport::I2c(t) => t
                .default_address
                .map(|a| format!("i2c@{a}"))
                .unwrap_or_else(|| "i2c".to_string()),
            Transport::Analog(a) => format!("analog:{:?}", a.pin),
            Transport::Uart(_) => "uart".to_string(),
        };
        println!(
            "{}\t{:?}\t{}\tmodes={}\tcommands={}\t{}",
            d.id,
            d.kind,
            transport,
            d.num_modes(),
            d.commands.len(),
            d.name
        );
    }
    for m in catalog.motors() {
        println!("{}\tmotor\tmax_speed={}\t{}", m.id, m.max_speed, m.name);
    }
    Ok(())
}

fn catalog_show(desc_dir: Option<&str>, type_id: &str) -> Result<()> {
    let catalog = load_catalog(desc_dir)?;
    let desc = catalog.lookup(type_id)?;
    println!("{}", serde_json::to_string_pretty(&**desc)?);
    Ok(())
}

fn descriptor_validate(file: Option<&str>, dir: Option<&str>, json: bool) -> Result<()> {
    let catalog = match (file, dir) {
        (Some(f), None) => {
            let mut catalog = Catalog::builtin()?;
            let before = catalog.len();
            catalog.merge(preg::load_descriptor_file(f)?)?;
            println!("ok: {f} ({} peripherals)", catalog.len() - before);
            catalog
        }
        (None, Some(d)) => {
            let catalog = preg::load_descriptors_dir(d)?;
            println!(
                "ok: loaded {} peripherals, {} motors",
                catalog.len(),
                catalog.motors().count()
            );
            catalog
        }
        _ => {
            return Err(anyhow::anyhow!("provide --file <path> or --dir <dir>"));
        }
    };
    if json {
        let all: Vec<_> = catalog.iter().map(|d| &**d).collect();
        println!("{}", serde_json::to_string_pretty(&all)?);
    }
    Ok(())
}

fn identify_mock(desc_dir: Option<&str>, vendor: &str, product: &str, address: &str) -> Result<()> {
    let catalog = load_catalog(desc_dir)?;
    let addr = parse_address(address)?;
    let mock = MockBus::new("mock0");
    mock.set_ids(addr, vendor, product);
    let bus = SharedBus::new(mock);

    let ids = bus_transport::identify(&bus, addr)?;
    match catalog.find_by_ids(&ids.vendor_id, &ids.product_id) {
        Some(d) => println!("{addr}\t{}\t{}", d.id, d.name),
        None => {
            return Err(anyhow::anyhow!(
                "no descriptor for vendor '{}' product '{}'",
                ids.vendor_id,
                ids.product_id
            ))
        }
    }
    Ok(())
}

struct RunOptions<'a> {
    type_id: &'a str,
    port: &'a str,
    address: Option<&'a str>,
    port_device: Option<&'a str>,
    mode: Option<&'a str>,
    command: Option<&'a str>,
    write: &'a [f64],
    polls: u32,
    regs: &'a [String],
    json: bool,
    metrics: bool,
}

fn run_mock(desc_dir: Option<&str>, opts: &RunOptions<'_>) -> Result<()> {
    let catalog = Arc::new(load_catalog(desc_dir)?);
    let desc = catalog.lookup(opts.type_id)?;
    let addr = match (opts.address, desc.transport()) {
        (Some(a), _) => parse_address(a)?,
        (None, Transport::I2c(t)) => match t.default_address {
            Some(a) => a,
            None => parse_address("0x01")?,
        },
        // analog ports ignore the address
        (None, Transport::Analog(_)) => parse_address("0x01")?,
        (None, Transport::Uart(_)) => {
            anyhow::bail!("{} is only reachable through a multiplexer port", opts.type_id)
        }
    };

    let mock = MockBus::new("mock0");
    for preset in opts.regs {
        let (reg, bytes) = parse_register_preset(preset)?;
        mock.set_registers(addr, reg, &bytes);
    }
    let bus = SharedBus::new(mock);

    let hub = MetricsHub::new().map_err(|e| anyhow::anyhow!(e))?;
    let mut mgr = PeripheralManager::new(Arc::clone(&catalog)).with_metrics(hub.clone());
    let id = mgr.attach(bus, addr, opts.type_id, opts.port)?;
    for child in mgr.children(id) {
        let c = mgr.peripheral(*child)?;
        info!(port = %c.port_identity(), type_id = %c.type_id(), "child");
        println!("child\t{}\t{}", c.port_identity(), c.type_id());
    }

    let target = match opts.port_device {
        Some(sensor) => {
            let port = *mgr
                .children(id)
                .first()
                .ok_or_else(|| anyhow::anyhow!("{} has no ports", opts.type_id))?;
            let hosted = mgr.set_port_device(port, sensor)?;
            println!("hosted\t{}", mgr.peripheral(hosted)?.port_identity());
            hosted
        }
        None => id,
    };

    let dev = mgr.peripheral_mut(target)?;
    if let Some(mode) = opts.mode {
        dev.set_mode_by_name(mode)?;
    }
    if let Some(command) = opts.command {
        dev.send_command_by_name(command)?;
    }
    if !opts.write.is_empty() {
        dev.write_output(opts.write)?;
    }

    let period = Duration::from_millis(u64::from(dev.poll_ms()));
    for i in 0..opts.polls {
        if i > 0 && !period.is_zero() {
            thread::sleep(period);
        }
        dev.poll()?;
        let rec = ReadingRecord {
            ts: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            port: dev.port_identity().to_string(),
            type_id: dev.type_id().to_string(),
            mode: dev.mode_info().name.clone(),
            units: dev.mode_info().units.clone(),
            raw: hex(dev.raw_reading()),
            values: dev.current_reading()?,
        };
        if opts.json {
            println!("{}", serde_json::to_string(&rec)?);
        } else {
            println!(
                "{}\t{}\t{:?} {}\traw={}",
                rec.port, rec.mode, rec.values, rec.units, rec.raw
            );
        }
    }

    mgr.detach(id)?;
    if opts.metrics {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

fn parse_address(s: &str) -> Result<BusAddress> {
    let t = s.trim();
    let no_prefix = t.strip_prefix("0x").unwrap_or(t);
    let raw = u8::from_str_radix(no_prefix, 16)
        .map_err(|e| anyhow::anyhow!("invalid address '{t}': {e}"))?;
    BusAddress::new(raw).ok_or_else(|| anyhow::anyhow!("address '{t}' is above 0x7F"))
}

fn parse_register_preset(s: &str) -> Result<(u8, Vec<u8>)> {
    let (reg, data) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected REG=BYTES, got '{s}'"))?;
    let reg = reg.trim();
    let reg = u8::from_str_radix(reg.strip_prefix("0x").unwrap_or(reg), 16)
        .map_err(|e| anyhow::anyhow!("invalid register '{reg}': {e}"))?;
    let items: Vec<String> = data.split(',').map(|b| b.to_string()).collect();
    Ok((reg, parse_hex_bytes(&items)?))
}

fn parse_hex_bytes(items: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(items.len());
    for s in items {
        let t = s.trim();
        let no_prefix = t.strip_prefix("0x").unwrap_or(t);
        let b = u8::from_str_radix(no_prefix, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex byte '{t}': {e}"))?;
        out.push(b);
    }
    Ok(out)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::new();
    for b in bytes {
        let _ = core::fmt::Write::write_fmt(&mut out, format_args!("{b:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register_preset() {
        let (reg, bytes) = parse_register_preset("0x53=E8,03").unwrap();
        assert_eq!(reg, 0x53);
        assert_eq!(bytes, vec![0xE8, 0x03]);
        assert!(parse_register_preset("0x53").is_err());
        assert!(parse_register_preset("zz=00").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x58").unwrap().raw(), 0x58);
        assert_eq!(parse_address("11").unwrap().raw(), 0x11);
        assert!(parse_address("0x80").is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x0A, 0xFF]), "0AFF");
    }
}
