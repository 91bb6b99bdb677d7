use anyhow::Context;
use link_core::Targets;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Interval of every convergence/readiness poll loop
    pub poll_interval_ms: u64,
    /// How long mode/arming calls wait for the vehicle to leave INITIALISING
    pub init_timeout_ms: u64,
    /// Per-script grace period on shutdown
    pub script_grace_ms: u64,
    /// Inbound message names dropped while any script runs
    pub suppress_while_scripting: Vec<String>,
    pub target_system: u8,
    pub target_component: u8,
    /// Finished scripts kept for `history()`
    pub script_history: usize,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            init_timeout_ms: 30_000,
            script_grace_ms: 5_000,
            suppress_while_scripting: vec!["COMMAND_ACK".into(), "STATUSTEXT".into()],
            target_system: 1,
            target_component: 1,
            script_history: 32,
        }
    }
}

impl VehicleConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
    pub fn init_timeout(&self) -> Duration { Duration::from_millis(self.init_timeout_ms) }
    pub fn script_grace(&self) -> Duration { Duration::from_millis(self.script_grace_ms) }

    pub fn targets(&self) -> Targets {
        Targets { system: self.target_system, component: self.target_component }
    }
}
