//! Projects one device's poll data onto the metric registry.
//!
//! The session remembers which room series it has exposed so that a failed
//! poll, a vanished room or a teardown retracts exactly those series and
//! nothing else. One session exists per device and is only ever touched by
//! that device's poll loop.

use crate::config::ReportConfig;
use crate::metrics::registry::Metrics;
use crate::models::device::{ComfortEco, DataPollResponse, HeatingCooling};
use std::sync::Arc;

/// Identity of a room series set currently exposed for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RoomDescriptor {
    id: String,
    name: String,
}

pub struct DeviceSession {
    sys_id: String,
    rooms: Vec<RoomDescriptor>,
    report: ReportConfig,
    metrics: Arc<Metrics>,
}

impl DeviceSession {
    pub fn new(sys_id: impl Into<String>, report: ReportConfig, metrics: Arc<Metrics>) -> Self {
        DeviceSession {
            sys_id: sys_id.into(),
            rooms: Vec::new(),
            report,
            metrics,
        }
    }

    pub fn sys_id(&self) -> &str {
        &self.sys_id
    }

    /// Drives the connected indicator.
    pub fn connected(&self, connected: bool) {
        if self.report.connected {
            self.metrics.connected(&self.sys_id, connected);
        }
    }

    /// Applies one snapshot to the registry.
    pub fn report(&mut self, values: &DataPollResponse) {
        if self.report.external_temperature {
            self.metrics.external_temperature(&self.sys_id, values.external_temperature);
        }
        if self.report.water_temperature {
            self.metrics.water_temperature(&self.sys_id, values.water_temperature);
        }
        if self.report.heating_mode {
            self.metrics
                .heating_mode(&self.sys_id, values.heating_cooling == HeatingCooling::Heating);
        }
        if self.report.eco_mode {
            self.metrics.eco_mode(&self.sys_id, values.comfort_eco == ComfortEco::Eco);
        }

        // Rooms exposed earlier that the device no longer reports at all are
        // treated like rooms that went offline.
        let vanished: Vec<RoomDescriptor> = self
            .rooms
            .iter()
            .filter(|room| !values.thermostats.contains_key(&room.id))
            .cloned()
            .collect();
        for room in vanished {
            self.metrics.remove_room(&self.sys_id, &room.id, &room.name);
            if self.report.room_connected {
                self.metrics.room_connected(&self.sys_id, &room.id, &room.name, false);
            }
        }

        for (id, thermostat) in &values.thermostats {
            if !thermostat.is_enabled() {
                self.forget_room(id);
                continue;
            }
            self.remember_room(id, &thermostat.name);
            if !thermostat.is_live() {
                self.metrics.remove_room(&self.sys_id, id, &thermostat.name);
                if self.report.room_connected {
                    self.metrics.room_connected(&self.sys_id, id, &thermostat.name, false);
                }
                continue;
            }
            if self.report.room_connected {
                self.metrics.room_connected(&self.sys_id, id, &thermostat.name, true);
            }
            if self.report.temperature {
                self.metrics
                    .room_temperature(&self.sys_id, id, &thermostat.name, thermostat.temperature);
            }
            if self.report.dew_temperature {
                self.metrics
                    .room_dew_temperature(&self.sys_id, id, &thermostat.name, thermostat.dew_temperature);
            }
            if self.report.relay {
                self.metrics
                    .room_relay(&self.sys_id, id, &thermostat.name, thermostat.relay_on());
            }
            if self.report.humidity {
                self.metrics
                    .room_humidity(&self.sys_id, id, &thermostat.name, thermostat.relative_humidity);
            }
            if self.report.target_temperature {
                self.metrics.room_target_temperature(
                    &self.sys_id,
                    id,
                    &thermostat.name,
                    thermostat.target_temperature(),
                );
            }
        }
    }

    /// Retracts everything and marks the device disconnected; called when a
    /// login or poll fails.
    pub fn disconnected(&mut self) {
        self.teardown();
        self.connected(false);
    }

    /// Full retraction at loop exit: nothing this device created survives.
    pub fn teardown(&mut self) {
        for room in std::mem::take(&mut self.rooms) {
            self.metrics.remove_room(&self.sys_id, &room.id, &room.name);
        }
        self.metrics.remove_device(&self.sys_id);
    }

    fn remember_room(&mut self, id: &str, name: &str) {
        if let Some(existing) = self.rooms.iter_mut().find(|room| room.id == id) {
            if existing.name != name {
                // the series under the old display name would linger forever
                let old_name = std::mem::replace(&mut existing.name, name.to_string());
                self.metrics.remove_room(&self.sys_id, id, &old_name);
            }
        } else {
            self.rooms.push(RoomDescriptor {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
    }

    fn forget_room(&mut self, id: &str) {
        if let Some(pos) = self.rooms.iter().position(|room| room.id == id) {
            let room = self.rooms.remove(pos);
            self.metrics.remove_room(&self.sys_id, &room.id, &room.name);
        }
    }
}
