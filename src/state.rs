use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{bank::BankState, clock::RasterGeometry, scheduler::SchedulerState};

/// Everything needed to resume at the exact simulated instant a snapshot was
/// taken: clock, bank slots, pending timers and the driver's own peripherals,
/// so a coin pulse in flight comes back held with its release still armed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState<E, S = ()> {
    pub elapsed_cycles: u64,
    pub geometry: RasterGeometry,
    pub banks: Vec<BankState>,
    pub timers: SchedulerState<E>,
    pub driver: S,
}

impl<E: Serialize, S: Serialize> MachineState<E, S> {
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("serializing machine state")
    }
}

impl<E: DeserializeOwned, S: DeserializeOwned> MachineState<E, S> {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("parsing machine state")
    }
}
