use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct DeviceMetrics {
    pub bus_reads: IntCounter,
    pub bus_writes: IntCounter,
    pub bus_errors: IntCounter,
    pub peripherals_attached: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let bus_reads = IntCounter::new("pr_bus_reads", "Total bus read transactions")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let bus_writes = IntCounter::new("pr_bus_writes", "Total bus write transactions")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let bus_errors = IntCounter::new("pr_bus_errors", "Bus transactions that failed")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let peripherals_attached =
            IntGauge::new("pr_peripherals_attached", "Number of live peripherals")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let dev = DeviceMetrics {
            bus_reads,
            bus_writes,
            bus_errors,
            peripherals_attached,
        };
        let _ = registry.register(Box::new(dev.bus_reads.clone()));
        let _ = registry.register(Box::new(dev.bus_writes.clone()));
        let _ = registry.register(Box::new(dev.bus_errors.clone()));
        let _ = registry.register(Box::new(dev.peripherals_attached.clone()));
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
