//! Attach and detach of peripherals and the children they spawn.
//!
//! A parent and its children are built in a staging area and registered as
//! one batch, so a failed attach never leaves a partial tree behind.

use crate::hooks::{ChildRequest, ChildSpawner};
use crate::peripheral::{LinkState, PeripheralId};
use crate::{
    Catalog, Error, MetricsHub, Peripheral, PeripheralDescriptor, PeripheralKind, Result,
    Transport,
};
use bus_transport::{identify, read_fw_version, BusAddress, PinState, PortPin, SharedBus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wait between powering pin 1 and the first transfer to a slow device
pub const POWER_UP_SETTLE: Duration = Duration::from_millis(1);

struct Entry {
    peripheral: Peripheral,
    parent: Option<PeripheralId>,
    children: Vec<PeripheralId>,
}

/// Owner of every live peripheral
pub struct PeripheralManager {
    catalog: Arc<Catalog>,
    live: BTreeMap<PeripheralId, Entry>,
    next_id: u64,
    metrics: Option<MetricsHub>,
}

impl PeripheralManager {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            live: BTreeMap::new(),
            next_id: 1,
            metrics: None,
        }
    }

    /// Count bus traffic and live peripherals in `hub`.
    pub fn with_metrics(mut self, hub: MetricsHub) -> Self {
        self.metrics = Some(hub);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }

    /// Bind a peripheral of `type_id` at `address` and activate its default mode.
    pub fn attach(
        &mut self,
        bus: SharedBus,
        address: BusAddress,
        type_id: &str,
        port: &str,
    ) -> Result<PeripheralId> {
        let descriptor = Arc::clone(self.catalog.lookup(type_id)?);
        if descriptor.kind.is_child() {
            return Err(Error::WrongKind {
                operation: "attach",
                kind: descriptor.kind,
            });
        }

        let mut parent = self.build(descriptor, bus, address, port.to_string(), None);
        if let Transport::I2c(_) = parent.descriptor.transport() {
            parent.fw_version = match read_fw_version(&parent.bus, address) {
                Ok(version) => version,
                Err(e) => {
                    debug!(%port, error = %e, "firmware version unavailable");
                    String::new()
                }
            };
        }

        let hooks = parent.kind().hooks();
        let mut spawner = ChildSpawner::default();
        hooks.probe(&mut parent, &mut spawner)?;

        let mut staged: Vec<Peripheral> = Vec::new();
        for request in spawner.into_requests() {
            match self.build_child(&parent, &request) {
                Ok(child) => staged.push(child),
                Err(e) => {
                    warn!(
                        %port,
                        child = %request.label,
                        error = %e,
                        "child attach failed, unwinding"
                    );
                    unwind(&mut parent, staged, false);
                    return Err(e);
                }
            }
        }

        let pin1 = parent.descriptor.pin1();
        if let Some(state) = pin1 {
            if let Err(e) = parent.bus.set_gpio(PortPin::Pin1, state) {
                warn!(%port, error = %e, "pin 1 setup failed, unwinding");
                unwind(&mut parent, staged, false);
                return Err(e.into());
            }
        }
        if parent.descriptor.i2c.as_ref().is_some_and(|t| t.slow) {
            debug!(%port, "settling slow device");
            thread::sleep(POWER_UP_SETTLE);
        }
        if let Err(e) = parent.set_mode(0) {
            warn!(%port, error = %e, "default mode failed, unwinding");
            unwind(&mut parent, staged, pin1.is_some());
            return Err(e);
        }

        Ok(self.commit(parent, staged))
    }

    /// Identify the device at `address` and attach the matching descriptor.
    pub fn attach_detected(
        &mut self,
        bus: SharedBus,
        address: BusAddress,
        port: &str,
    ) -> Result<PeripheralId> {
        let ids = identify(&bus, address)?;
        let type_id = self
            .catalog
            .find_by_ids(&ids.vendor_id, &ids.product_id)
            .map(|d| d.id.clone())
            .ok_or_else(|| {
                Error::UnknownType(format!("{} {}", ids.vendor_id, ids.product_id))
            })?;
        debug!(%port, %address, %type_id, "device identified");
        self.attach(bus, address, &type_id, port)
    }

    /// Host a UART sensor of `type_id` on an EV3 multiplexer port.
    ///
    /// Whatever the port hosted before is detached first. The sensor shares the
    /// port's bank and only exposes its single-value view modes.
    pub fn set_port_device(&mut self, port: PeripheralId, type_id: &str) -> Result<PeripheralId> {
        let host = self.peripheral(port)?;
        if host.kind() != PeripheralKind::MsEv3SmuxPort {
            return Err(Error::WrongKind {
                operation: "set_port_device",
                kind: host.kind(),
            });
        }
        let descriptor = Arc::clone(self.catalog.lookup(type_id)?);
        let view_modes = match descriptor.transport() {
            Transport::Uart(uart) => uart.view_modes(descriptor.num_modes()),
            _ => {
                return Err(Error::WrongKind {
                    operation: "set_port_device",
                    kind: descriptor.kind,
                })
            }
        };
        let (bus, address, channel) = (host.bus.clone(), host.address, host.channel);
        let name = format!("{}:{}", host.port, descriptor.id);

        for old in self.children(port).to_vec() {
            debug!(port = %name, replaced = %old, "port device replaced");
            self.detach(old)?;
        }

        let mut dev = self.build(descriptor, bus, address, name, channel);
        dev.modes.truncate(view_modes);
        if let Err(e) = dev.set_mode(0) {
            warn!(port = %dev.port, error = %e, "hosted sensor failed its default mode");
            dev.kind().hooks().remove(&mut dev);
            return Err(e);
        }

        let id = dev.id;
        info!(id = %id, type_id = %dev.type_id(), port = %dev.port, "port device attached");
        self.live.insert(
            id,
            Entry {
                peripheral: dev,
                parent: Some(port),
                children: Vec::new(),
            },
        );
        if let Some(host) = self.live.get_mut(&port) {
            host.children.push(id);
        }
        self.update_gauge();
        Ok(id)
    }

    /// Detach a peripheral, its children first, most recent first.
    pub fn detach(&mut self, id: PeripheralId) -> Result<()> {
        let parent = match self.live.get(&id) {
            Some(entry) => entry.parent,
            // ids are issued in order and never reused
            None if id.0 >= 1 && id.0 < self.next_id => return Err(Error::DoubleDetach(id)),
            None => return Err(Error::NotAttached(id)),
        };
        if let Some(parent) = parent.and_then(|p| self.live.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        self.release_tree(id);
        self.update_gauge();
        Ok(())
    }

    fn release_tree(&mut self, id: PeripheralId) {
        if let Some(entry) = self.live.remove(&id) {
            for child in entry.children.iter().rev() {
                self.release_tree(*child);
            }
            self.release(entry.peripheral);
        }
    }

    pub fn get(&self, id: PeripheralId) -> Option<&Peripheral> {
        self.live.get(&id).map(|e| &e.peripheral)
    }

    pub fn get_mut(&mut self, id: PeripheralId) -> Option<&mut Peripheral> {
        self.live.get_mut(&id).map(|e| &mut e.peripheral)
    }

    pub fn peripheral(&self, id: PeripheralId) -> Result<&Peripheral> {
        self.get(id).ok_or(Error::NotAttached(id))
    }

    pub fn peripheral_mut(&mut self, id: PeripheralId) -> Result<&mut Peripheral> {
        self.get_mut(id).ok_or(Error::NotAttached(id))
    }

    /// Live children of `id` in creation order.
    pub fn children(&self, id: PeripheralId) -> &[PeripheralId] {
        self.live
            .get(&id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: PeripheralId) -> Option<PeripheralId> {
        self.live.get(&id).and_then(|e| e.parent)
    }

    pub fn ids(&self) -> Vec<PeripheralId> {
        self.live.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn build(
        &mut self,
        descriptor: Arc<PeripheralDescriptor>,
        bus: SharedBus,
        address: BusAddress,
        port: String,
        channel: Option<u8>,
    ) -> Peripheral {
        let id = PeripheralId(self.next_id);
        self.next_id += 1;
        let motor = descriptor
            .motor
            .as_deref()
            .and_then(|m| self.catalog.motor(m))
            .cloned();
        let mut dev = Peripheral::new(id, descriptor, bus, address, port);
        dev.channel = channel;
        dev.motor = motor;
        dev.metrics = self.metrics.as_ref().map(|hub| hub.dev.clone());
        dev
    }

    fn build_child(&mut self, parent: &Peripheral, request: &ChildRequest) -> Result<Peripheral> {
        let descriptor = Arc::clone(self.catalog.lookup(&request.type_id)?);
        let port = format!("{}:{}", parent.port, request.label);
        let mut child = self.build(
            descriptor,
            parent.bus.clone(),
            parent.address,
            port,
            Some(request.channel),
        );
        let hooks = child.kind().hooks();
        let mut nested = ChildSpawner::default();
        hooks.probe(&mut child, &mut nested)?;
        if !nested.requests().is_empty() {
            hooks.remove(&mut child);
            return Err(Error::ProbeFailed(format!(
                "{} cannot spawn children of its own",
                child.port
            )));
        }
        if let Err(e) = child.set_mode(0) {
            hooks.remove(&mut child);
            return Err(e);
        }
        Ok(child)
    }

    fn commit(&mut self, parent: Peripheral, staged: Vec<Peripheral>) -> PeripheralId {
        let parent_id = parent.id;
        let children: Vec<PeripheralId> = staged.iter().map(|c| c.id).collect();
        info!(
            id = %parent_id,
            type_id = %parent.type_id(),
            port = %parent.port,
            address = %parent.address,
            fw = %parent.fw_version,
            children = children.len(),
            "peripheral attached"
        );
        for child in staged {
            self.live.insert(
                child.id,
                Entry {
                    peripheral: child,
                    parent: Some(parent_id),
                    children: Vec::new(),
                },
            );
        }
        self.live.insert(
            parent_id,
            Entry {
                peripheral: parent,
                parent: None,
                children,
            },
        );
        self.update_gauge();
        parent_id
    }

    fn release(&mut self, mut dev: Peripheral) {
        dev.kind().hooks().remove(&mut dev);
        if dev.descriptor.pin1().is_some() {
            if let Err(e) = dev.bus.set_gpio(PortPin::Pin1, PinState::Float) {
                warn!(port = %dev.port, error = %e, "failed to float pin 1");
            }
        }
        dev.link = LinkState::Detached;
        info!(id = %dev.id, type_id = %dev.type_id(), port = %dev.port, "peripheral detached");
    }

    fn update_gauge(&self) {
        if let Some(hub) = &self.metrics {
            hub.dev.peripherals_attached.set(self.live.len() as i64);
        }
    }
}

/// Remove staged children newest first, then the parent's own driver state.
fn unwind(parent: &mut Peripheral, staged: Vec<Peripheral>, float_pin1: bool) {
    for mut child in staged.into_iter().rev() {
        child.kind().hooks().remove(&mut child);
        debug!(port = %child.port, "staged child removed");
    }
    parent.kind().hooks().remove(parent);
    if float_pin1 {
        if let Err(e) = parent.bus.set_gpio(PortPin::Pin1, PinState::Float) {
            warn!(port = %parent.port, error = %e, "failed to float pin 1");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{addr, manager, mock_bus};
    use crate::PeripheralKind;

    #[test]
    fn test_attach_detach_multi_child_leaves_nothing() {
        let (_mock, bus) = mock_bus();
        let handle = bus.clone();
        let mut mgr = manager();
        let id = mgr.attach(bus, addr(0x58), "ms-8ch-servo", "in2").unwrap();
        assert_eq!(mgr.len(), 9);
        assert_eq!(handle.handle_count(), 10);
        let first = mgr.children(id)[0];
        assert_eq!(mgr.parent(first), Some(id));
        assert_eq!(mgr.get(first).unwrap().channel(), Some(0));

        mgr.detach(id).unwrap();
        assert!(mgr.is_empty());
        assert_eq!(handle.handle_count(), 1);
        assert!(matches!(mgr.detach(first), Err(Error::DoubleDetach(_))));
    }

    #[test]
    fn test_failing_child_unwinds_everything() {
        let (mock, bus) = mock_bus();
        let handle = bus.clone();
        let mut mgr = manager();
        // the third port's mode register NAKs
        mock.fail_writes_to(addr(0x50), 0x72);

        let err = mgr.attach(bus, addr(0x50), "ms-ev3-smux", "in1").unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
        assert!(mgr.is_empty());
        assert_eq!(handle.handle_count(), 1);

        // the first two ports were configured before the failure
        let regs: Vec<u8> = mock.writes().iter().map(|w| w.reg).collect();
        assert_eq!(regs, vec![0x52, 0x62]);

        mock.clear_failures();
        let id = mgr.attach(handle, addr(0x50), "ms-ev3-smux", "in1").unwrap();
        assert_eq!(mgr.children(id).len(), 3);
    }

    #[test]
    fn test_failing_default_mode_unwinds_children() {
        let (mock, bus) = mock_bus();
        let mut mgr = manager();
        mock.fail_writes_to(addr(0x08), 0x20);
        assert!(mgr.attach(bus, addr(0x08), "ht-nxt-smux", "in4").is_err());
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_detach_errors() {
        let (_mock, bus) = mock_bus();
        let mut mgr = manager();
        let id = mgr.attach(bus, addr(0x01), "ht-nxt-compass", "in1").unwrap();
        assert!(matches!(
            mgr.detach(PeripheralId(999)),
            Err(Error::NotAttached(_))
        ));
        assert!(matches!(
            mgr.detach(PeripheralId(0)),
            Err(Error::NotAttached(_))
        ));
        mgr.detach(id).unwrap();
        assert!(matches!(mgr.detach(id), Err(Error::DoubleDetach(_))));
        // later attaches do not make an old id live again
        let (_mock, bus) = mock_bus();
        let next = mgr.attach(bus, addr(0x01), "ht-nxt-compass", "in1").unwrap();
        assert!(next > id);
        assert!(matches!(mgr.detach(id), Err(Error::DoubleDetach(_))));
        assert!(matches!(mgr.peripheral(id), Err(Error::NotAttached(_))));
    }

    #[test]
    fn test_pin1_follows_attachment() {
        let (mock, bus) = mock_bus();
        let mut mgr = manager();
        let id = mgr.attach(bus, addr(0x08), "ht-super-pro", "in1").unwrap();
        assert_eq!(mock.gpio(PortPin::Pin1), Some(PinState::High));
        mgr.detach(id).unwrap();
        assert_eq!(mock.gpio(PortPin::Pin1), Some(PinState::Float));
    }

    #[test]
    fn test_slow_device_settles_after_power_up() {
        let (mock, bus) = mock_bus();
        let mut mgr = manager();
        let started = std::time::Instant::now();
        let id = mgr.attach(bus, addr(0x01), "lego-nxt-us", "in1").unwrap();
        assert!(started.elapsed() >= POWER_UP_SETTLE);
        assert_eq!(mock.gpio(PortPin::Pin1), Some(PinState::High));
        assert_eq!(mock.register(addr(0x01), 0x41), 0x02);

        let dev = mgr.get_mut(id).unwrap();
        assert_eq!(dev.list_modes()[0], "US-DIST-CM");
        mock.set_registers(addr(0x01), 0x42, &[42]);
        dev.poll().unwrap();
        assert_eq!(dev.current_reading().unwrap(), vec![42.0]);

        dev.set_mode_by_name("US-DIST-IN").unwrap();
        mock.set_registers(addr(0x01), 0x42, &[255]);
        dev.poll().unwrap();
        assert_eq!(dev.current_reading().unwrap(), vec![100.0]);
    }

    #[test]
    fn test_detach_child_directly() {
        let (_mock, bus) = mock_bus();
        let mut mgr = manager();
        let id = mgr.attach(bus, addr(0x03), "ms-nxtmmx", "in2").unwrap();
        let children = mgr.children(id).to_vec();

        mgr.detach(children[0]).unwrap();
        assert_eq!(mgr.children(id), &children[1..]);
        mgr.detach(id).unwrap();
        assert!(mgr.is_empty());
        assert!(matches!(
            mgr.detach(children[1]),
            Err(Error::DoubleDetach(_))
        ));
    }

    #[test]
    fn test_attach_rejects_unknown_and_child_types() {
        let (_mock, bus) = mock_bus();
        let mut mgr = manager();
        assert!(matches!(
            mgr.attach(bus.clone(), addr(0x01), "no-such-sensor", "in1"),
            Err(Error::UnknownType(_))
        ));
        assert!(matches!(
            mgr.attach(bus, addr(0x58), "ms-8ch-servo-channel", "in1"),
            Err(Error::WrongKind {
                kind: PeripheralKind::Ms8chServoChannel,
                ..
            })
        ));
    }

    #[test]
    fn test_firmware_version_read_at_attach() {
        let (mock, bus) = mock_bus();
        mock.set_registers(addr(0x01), 0x00, b"\xFDV1.2  \0");
        let mut mgr = manager();
        let id = mgr.attach(bus.clone(), addr(0x01), "ht-nxt-color", "in1").unwrap();
        assert_eq!(mgr.get(id).unwrap().fw_version(), "V1.2");

        // a missing device still attaches; mode 0 writes nothing
        mock.remove_device(addr(0x02));
        let id = mgr.attach(bus, addr(0x02), "lego-power-storage", "in2").unwrap();
        assert_eq!(mgr.get(id).unwrap().fw_version(), "");
    }

    #[test]
    fn test_attach_detected() {
        let (mock, bus) = mock_bus();
        mock.set_ids(addr(0x11), "mndsnsrs", "AbsIMU");
        let mut mgr = manager();
        let id = mgr.attach_detected(bus.clone(), addr(0x11), "in3").unwrap();
        assert_eq!(mgr.get(id).unwrap().type_id(), "ms-absolute-imu");

        mock.set_ids(addr(0x12), "nobody", "nothing");
        assert!(matches!(
            mgr.attach_detected(bus, addr(0x12), "in4"),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn test_metrics_track_live_count_and_traffic() {
        let hub = MetricsHub::new().unwrap();
        let (mock, bus) = mock_bus();
        let mut mgr = manager().with_metrics(hub.clone());
        let id = mgr.attach(bus, addr(0x58), "ms-8ch-servo", "in2").unwrap();
        assert_eq!(hub.dev.peripherals_attached.get(), 9);

        let reads = hub.dev.bus_reads.get();
        mock.fail_next_reads(addr(0x58), 0x62, 1);
        assert!(mgr.get_mut(id).unwrap().poll().is_err());
        assert_eq!(hub.dev.bus_reads.get(), reads + 1);
        assert_eq!(hub.dev.bus_errors.get(), 1);

        mgr.detach(id).unwrap();
        assert_eq!(hub.dev.peripherals_attached.get(), 0);
    }
}
