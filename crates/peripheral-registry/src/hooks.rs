//! Optional per-kind driver callbacks.
//!
//! Every method has a default that performs the declarative behavior, so a kind
//! only overrides the steps it customizes.

use crate::{Peripheral, Result};
use serde::Serialize;

/// Whether a pre-hook left the register protocol to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFlow {
    Continue,
    Handled,
}

/// Run state of a HiTechnic sensor multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmuxRunState {
    Halted,
    Detecting,
    Running,
}

impl SmuxRunState {
    pub fn from_status(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SmuxRunState::Halted),
            1 => Some(SmuxRunState::Detecting),
            2 => Some(SmuxRunState::Running),
            _ => None,
        }
    }
}

/// Per-kind mutable driver state owned by a peripheral
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverContext {
    #[default]
    None,
    Xg1300l {
        accel_factor: i64,
    },
    HtSmux {
        run_state: SmuxRunState,
    },
}

/// A child peripheral requested by a probe hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRequest {
    pub type_id: String,
    pub label: String,
    pub channel: u8,
}

/// Collects child requests during probe; the lifecycle manager builds them.
#[derive(Debug, Default)]
pub struct ChildSpawner {
    requests: Vec<ChildRequest>,
}

impl ChildSpawner {
    /// Request `count` children named `<prefix>1..<prefix>count` on channels `0..count`.
    pub fn spawn_channels(&mut self, type_id: &str, prefix: &str, count: u8) {
        for channel in 0..count {
            self.requests.push(ChildRequest {
                type_id: type_id.to_string(),
                label: format!("{prefix}{}", channel + 1),
                channel,
            });
        }
    }

    pub fn requests(&self) -> &[ChildRequest] {
        &self.requests
    }

    pub(crate) fn into_requests(self) -> Vec<ChildRequest> {
        self.requests
    }
}

pub trait PeripheralHooks: Sync {
    /// Called once while attaching, before the default mode is set.
    fn probe(&self, _dev: &mut Peripheral, _children: &mut ChildSpawner) -> Result<()> {
        Ok(())
    }

    /// Called once while detaching, or when an attach is unwound after probe.
    fn remove(&self, _dev: &mut Peripheral) {}

    fn poll(&self, dev: &mut Peripheral) -> Result<()> {
        dev.default_poll()
    }

    fn pre_set_mode(&self, _dev: &mut Peripheral, _mode: usize) -> Result<HookFlow> {
        Ok(HookFlow::Continue)
    }

    fn post_set_mode(&self, _dev: &mut Peripheral, _mode: usize) -> Result<()> {
        Ok(())
    }

    fn pre_send_command(&self, _dev: &mut Peripheral, _command: usize) -> Result<HookFlow> {
        Ok(HookFlow::Continue)
    }

    fn post_send_command(&self, _dev: &mut Peripheral, _command: usize) -> Result<()> {
        Ok(())
    }
}

/// Purely declarative behavior
pub struct DefaultHooks;

impl PeripheralHooks for DefaultHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_channels_labels() {
        let mut spawner = ChildSpawner::default();
        spawner.spawn_channels("ms-8ch-servo-channel", "sv", 8);
        let labels: Vec<_> = spawner.requests().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["sv1", "sv2", "sv3", "sv4", "sv5", "sv6", "sv7", "sv8"]);
        assert_eq!(spawner.requests()[7].channel, 7);
    }

    #[test]
    fn test_smux_status() {
        assert_eq!(SmuxRunState::from_status(2), Some(SmuxRunState::Running));
        assert_eq!(SmuxRunState::from_status(9), None);
    }
}
