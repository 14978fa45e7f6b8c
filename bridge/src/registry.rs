use std::sync::{PoisonError, RwLock};

use climate_common::{Device, DeviceId, DeviceState, Fleet, Mode, Topology};
use tokio::sync::Mutex;

/// One device and the last state published for it. The mutex serializes the
/// read-decide-act cycle; the snapshot lets zone peers read without it.
pub struct Slot {
    pub device: Mutex<Device>,
    snapshot: RwLock<Option<DeviceState>>,
}

impl Slot {
    fn new(device: Device) -> Self {
        Self {
            device: Mutex::new(device),
            snapshot: RwLock::new(None),
        }
    }

    pub fn snapshot(&self) -> Option<DeviceState> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true when `state` differs from the stored snapshot.
    pub fn store_snapshot(&self, state: &DeviceState) -> bool {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if snapshot.as_ref() == Some(state) {
            return false;
        }
        *snapshot = Some(state.clone());
        true
    }
}

pub struct Registry {
    topology: Topology,
    slots: Vec<Slot>,
}

impl Registry {
    pub fn new(fleet: Fleet) -> Self {
        Self {
            topology: fleet.topology,
            slots: fleet.devices.into_iter().map(Slot::new).collect(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn slot(&self, id: DeviceId) -> &Slot {
        &self.slots[id.0]
    }

    /// Mode the primary of `id`'s zone is currently running, if any.
    pub fn primary_active_mode(&self, id: DeviceId) -> Option<Mode> {
        let primary = self.topology.zone_of(id).primary;
        self.slot(primary)
            .snapshot()
            .and_then(|state| state.active_mode())
    }
}
