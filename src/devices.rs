// src/devices.rs
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PointingError, PointingResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
}

/// Known devices, unique by id. Insertion order is kept for listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCatalog {
    devices: Vec<Device>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: impl Into<String>, name: impl Into<String>) -> PointingResult<&Device> {
        let id = id.into();
        if self.contains(&id) {
            return Err(PointingError::DuplicateDevice(id));
        }
        let device = Device {
            id,
            name: name.into(),
        };
        info!(device = %device.id, name = %device.name, "device added");
        self.devices.push(device);
        Ok(&self.devices[self.devices.len() - 1])
    }

    /// `<kind>_<n>` with `n` one past the number of devices of that kind.
    pub fn next_id(&self, kind: &str) -> String {
        let count = self
            .devices
            .iter()
            .filter(|d| d.id.split('_').next() == Some(kind))
            .count();
        format!("{}_{}", kind, count + 1)
    }

    pub fn remove(&mut self, id: &str) -> PointingResult<Device> {
        let index = self
            .devices
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| PointingError::DeviceNotFound(id.to_string()))?;
        Ok(self.devices.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn require(&self, id: &str) -> PointingResult<&Device> {
        self.get(id)
            .ok_or_else(|| PointingError::DeviceNotFound(id.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn list(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
