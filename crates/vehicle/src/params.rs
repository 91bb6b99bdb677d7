use std::collections::{HashMap, HashSet};

use link_core::{OutboundFrame, ParamSetData, ParamValueData, TargetedData};
use parking_lot::RwLock;

use crate::error::VehicleError;
use crate::outbox::Outbox;
use crate::wait::Poller;

pub const MAV_PARAM_TYPE_REAL32: u8 = 9;

/// Autopilot parameter names are upper case and NUL padded on the wire.
fn normalize(name: &str) -> String {
    name.trim_end_matches('\0').to_ascii_uppercase()
}

#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    values: HashMap<String, f32>,
    received: HashSet<u16>,
    expected: u16,
}

impl ParameterTable {
    pub fn is_valid(&self) -> bool {
        self.expected != 0 && self.received.len() == self.expected as usize
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(&normalize(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn apply(&mut self, pv: &ParamValueData) {
        if pv.param_count != 0 && pv.param_count != self.expected {
            if self.expected != 0 {
                log::debug!("parameter count changed {} -> {}", self.expected, pv.param_count);
            }
            self.expected = pv.param_count;
            self.received.retain(|i| *i < pv.param_count);
        }
        if pv.param_index < pv.param_count {
            self.received.insert(pv.param_index);
        }
        self.values.insert(normalize(&pv.param_id), pv.param_value);
    }
}

/// Blocking view of the autopilot's parameters.
pub struct Parameters {
    table: RwLock<ParameterTable>,
    outbox: Outbox,
    poller: Poller,
}

impl Parameters {
    pub(crate) fn new(outbox: Outbox, poller: Poller) -> Self {
        Self { table: RwLock::new(ParameterTable::default()), outbox, poller }
    }

    /// Wait until every parameter has been received. False means shutdown.
    pub fn await_valid(&self) -> bool {
        self.poller.until(|| self.table.read().is_valid())
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.await_valid();
        self.table.read().get(name)
    }

    /// Sends PARAM_SET. The table only changes once the vehicle echoes PARAM_VALUE.
    pub fn set(&self, name: &str, value: f32) -> Result<(), VehicleError> {
        self.await_valid();
        self.outbox.send(OutboundFrame::ParamSet(ParamSetData {
            param_id: normalize(name),
            param_value: value,
            param_type: MAV_PARAM_TYPE_REAL32,
            ..Default::default()
        }))?;
        Ok(())
    }

    /// Forget everything and ask for the full list again.
    pub fn refresh(&self) -> Result<(), VehicleError> {
        *self.table.write() = ParameterTable::default();
        self.outbox.send(OutboundFrame::ParamRequestList(TargetedData::default()))?;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.table.read().is_valid()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(String, f32)> {
        let mut all: Vec<_> = self.table.read().values.iter().map(|(k, v)| (k.clone(), *v)).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub(crate) fn on_param_value(&self, pv: &ParamValueData) {
        self.table.write().apply(pv);
    }
}
