use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    config::Settings,
    device::{Device, DeviceId, ZoneId},
    error::{ConfigError, RouteError},
    types::{Command, Mode},
};

/// One entry of the cloud device directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub device_name: String,
    pub device_id: String,
}

impl DirectoryEntry {
    /// Directory names may contain spaces, configuration keys use `_`.
    pub fn normalized_name(&self) -> String {
        self.device_name.replace(' ', "_")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub devices: Vec<DeviceId>,
    pub primary: DeviceId,
    pub clamp_id: String,
}

impl Zone {
    pub fn is_primary(&self, device: DeviceId) -> bool {
        self.primary == device
    }

    /// Members share one outdoor unit, so a secondary may not run a mode that
    /// conflicts with what the primary is currently running.
    pub fn permits(
        &self,
        device: DeviceId,
        requested: &Command,
        primary_active: Option<Mode>,
    ) -> bool {
        if self.is_primary(device) || !requested.is_on() {
            return true;
        }
        match primary_active {
            None => true,
            Some(mode) => mode == requested.mode,
        }
    }
}

/// Target of an inbound `set` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetTarget {
    Device { zone: String, device: String },
    Zone { zone: String },
}

/// Static structure of the device/zone graph: names, membership and the
/// elected primaries. Never changes after `resolve`.
#[derive(Debug, Clone)]
pub struct Topology {
    zones: Vec<Zone>,
    device_names: Vec<String>,
    device_zone: Vec<ZoneId>,
    sensor_ids: Vec<String>,
    devices_by_name: HashMap<String, DeviceId>,
    zones_by_name: HashMap<String, ZoneId>,
}

impl Topology {
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, id: ZoneId) -> &Zone {
        &self.zones[id.0]
    }

    pub fn zone_of(&self, device: DeviceId) -> &Zone {
        self.zone(self.device_zone[device.0])
    }

    pub fn zone_by_name(&self, name: &str) -> Option<&Zone> {
        self.zones_by_name.get(name).map(|id| self.zone(*id))
    }

    pub fn device_by_name(&self, name: &str) -> Option<DeviceId> {
        self.devices_by_name.get(name).copied()
    }

    pub fn device_name(&self, device: DeviceId) -> &str {
        &self.device_names[device.0]
    }

    pub fn len(&self) -> usize {
        self.device_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.device_names.is_empty()
    }

    pub fn devices_with_sensor<'a>(
        &'a self,
        temp_device_id: &'a str,
    ) -> impl Iterator<Item = DeviceId> + 'a {
        self.sensor_ids
            .iter()
            .enumerate()
            .filter(move |(_, id)| id.eq_ignore_ascii_case(temp_device_id))
            .map(|(index, _)| DeviceId(index))
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.sensor_ids.iter().map(String::as_str)
    }

    pub fn zones_with_clamp<'a>(
        &'a self,
        clamp_id: &'a str,
    ) -> impl Iterator<Item = &'a Zone> + 'a {
        self.zones.iter().filter(move |zone| zone.clamp_id == clamp_id)
    }

    /// A zone-addressed target resolves to the zone's primary.
    pub fn resolve_target(&self, target: &SetTarget) -> Result<DeviceId, RouteError> {
        match target {
            SetTarget::Zone { zone } => self
                .zone_by_name(zone)
                .map(|zone| zone.primary)
                .ok_or_else(|| RouteError::UnknownZone(zone.clone())),
            SetTarget::Device { zone, device } => {
                let zone_ref = self
                    .zone_by_name(zone)
                    .ok_or_else(|| RouteError::UnknownZone(zone.clone()))?;
                let id = self
                    .device_by_name(device)
                    .ok_or_else(|| RouteError::UnknownDevice(device.clone()))?;
                if zone_ref.devices.contains(&id) {
                    Ok(id)
                } else {
                    Err(RouteError::NotInZone {
                        zone: zone.clone(),
                        device: device.clone(),
                    })
                }
            }
        }
    }
}

/// The fully resolved device set and its topology.
#[derive(Debug, Clone)]
pub struct Fleet {
    pub topology: Topology,
    pub devices: Vec<Device>,
}

/// Builds every device and zone from validated settings and the directory
/// listing, or fails without exposing any of them.
pub fn resolve(settings: &Settings, directory: &[DirectoryEntry]) -> Result<Fleet, ConfigError> {
    let device_ids: HashMap<String, String> = directory
        .iter()
        .map(|entry| (entry.normalized_name(), entry.device_id.clone()))
        .collect();

    let mut membership: BTreeMap<&str, &str> = BTreeMap::new();
    for (zone, members) in &settings.zones {
        if members.is_empty() {
            return Err(ConfigError::EmptyZone { zone: zone.clone() });
        }
        for member in members {
            if !settings.climates.contains_key(member) {
                return Err(ConfigError::UnknownZoneMember {
                    zone: zone.clone(),
                    device: member.clone(),
                });
            }
            if let Some(first) = membership.insert(member.as_str(), zone.as_str()) {
                return Err(ConfigError::MultipleZones {
                    device: member.clone(),
                    first: first.to_string(),
                    second: zone.clone(),
                });
            }
        }
    }

    let zone_index: HashMap<&str, ZoneId> = settings
        .zones
        .keys()
        .enumerate()
        .map(|(index, name)| (name.as_str(), ZoneId(index)))
        .collect();

    let mut devices = Vec::with_capacity(settings.climates.len());
    for (index, (name, climate)) in settings.climates.iter().enumerate() {
        let zone_name = *membership
            .get(name.as_str())
            .ok_or_else(|| ConfigError::Unzoned {
                device: name.clone(),
            })?;
        let device_id = device_ids
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDevice { name: name.clone() })?;
        devices.push(Device::from_config(
            DeviceId(index),
            name,
            climate,
            device_id,
            zone_index[zone_name],
        )?);
    }

    let devices_by_name: HashMap<String, DeviceId> = devices
        .iter()
        .map(|device| (device.name.clone(), device.id))
        .collect();

    let mut zones = Vec::with_capacity(settings.zones.len());
    for (index, (name, members)) in settings.zones.iter().enumerate() {
        let ids: Vec<DeviceId> = members.iter().map(|member| devices_by_name[member]).collect();

        let clamp_id = devices[ids[0].0].clamp.id.clone();
        if ids.iter().any(|id| devices[id.0].clamp.id != clamp_id) {
            return Err(ConfigError::ClampMismatch { zone: name.clone() });
        }

        let primary = elect_primary(name, &ids, &devices)?;
        zones.push(Zone {
            id: ZoneId(index),
            name: name.clone(),
            devices: ids,
            primary,
            clamp_id,
        });
    }

    for device in &mut devices {
        device.primary = zones[device.zone.0].is_primary(device.id);
    }

    let topology = Topology {
        zones_by_name: zones
            .iter()
            .map(|zone| (zone.name.clone(), zone.id))
            .collect(),
        zones,
        device_names: devices.iter().map(|device| device.name.clone()).collect(),
        device_zone: devices.iter().map(|device| device.zone).collect(),
        sensor_ids: devices
            .iter()
            .map(|device| device.temp_device_id.clone())
            .collect(),
        devices_by_name,
    };

    Ok(Fleet { topology, devices })
}

fn elect_primary(
    zone: &str,
    members: &[DeviceId],
    devices: &[Device],
) -> Result<DeviceId, ConfigError> {
    if let [only] = members {
        return Ok(*only);
    }
    let flagged: Vec<DeviceId> = members
        .iter()
        .copied()
        .filter(|id| devices[id.0].primary)
        .collect();
    match flagged.as_slice() {
        [primary] => Ok(*primary),
        _ => Err(ConfigError::PrimaryElection {
            zone: zone.to_string(),
            flagged: flagged.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::tests::SAMPLE, types::FanMode};

    fn directory() -> Vec<DirectoryEntry> {
        ["Living Room", "Bedroom", "Office A", "Office B", "Den"]
            .iter()
            .enumerate()
            .map(|(index, name)| DirectoryEntry {
                device_name: name.to_string(),
                device_id: format!("02-{index}"),
            })
            .collect()
    }

    fn settings(raw: &str) -> Settings {
        Settings::from_yaml(raw).unwrap()
    }

    const OFFICE: &str = r#"
mqtt_host: localhost
token: t
key: k
climates:
  Office_A:
    temperature: 22
    humidity: 50
    mode: cool
    fan_mode: auto
    preset_mode: none
    temp_device_id: 1234567890ab
    clamp: bbb/ch1
    primary: true
  Office_B:
    temperature: 22
    humidity: 50
    mode: cool
    fan_mode: auto
    preset_mode: none
    temp_device_id: cdef01234567
    clamp: bbb/ch1
    primary: true
zones:
  Office:
    - Office_A
    - Office_B
"#;

    #[test]
    fn home_elects_flagged_primary() {
        let fleet = resolve(&settings(SAMPLE), &directory()).unwrap();
        let home = fleet.topology.zone_by_name("Home").unwrap();

        assert_eq!(fleet.topology.device_name(home.primary), "Living_Room");
        assert_eq!(
            home.devices
                .iter()
                .map(|id| fleet.topology.device_name(*id))
                .collect::<Vec<_>>(),
            vec!["Living_Room", "Bedroom"]
        );
        assert!(fleet.devices[home.primary.0].primary);
        let bedroom = fleet.topology.device_by_name("Bedroom").unwrap();
        assert!(!fleet.devices[bedroom.0].primary);
        assert_eq!(fleet.devices[bedroom.0].device_id, "02-1");
    }

    #[test]
    fn office_with_two_primaries_fails_naming_zone() {
        let err = resolve(&settings(OFFICE), &directory()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::PrimaryElection { ref zone, flagged: 2 } if zone == "Office"
        ));
        assert!(err.to_string().contains("Office"));
    }

    #[test]
    fn multi_member_zone_without_primary_fails() {
        let raw = OFFICE.replace("    primary: true\n", "");
        let err = resolve(&settings(&raw), &directory()).unwrap_err();
        assert!(matches!(err, ConfigError::PrimaryElection { flagged: 0, .. }));
    }

    #[test]
    fn single_member_is_primary_regardless_of_flag() {
        let raw = r#"
mqtt_host: localhost
token: t
key: k
climates:
  Den:
    temperature: 20
    humidity: 40
    mode: heat
    fan_mode: high
    preset_mode: eco
    temp_device_id: 0123456789AB
    clamp: den/current
    primary: false
zones:
  Downstairs: [Den]
"#;
        let fleet = resolve(&settings(raw), &directory()).unwrap();
        let zone = fleet.topology.zone_by_name("Downstairs").unwrap();
        let den = fleet.topology.device_by_name("Den").unwrap();
        assert_eq!(zone.primary, den);
        assert!(fleet.devices[den.0].primary);
        assert_eq!(fleet.devices[den.0].fan_mode(), FanMode::High);
    }

    #[test]
    fn unresolved_device_name_fails() {
        let entries: Vec<DirectoryEntry> = directory()
            .into_iter()
            .filter(|entry| entry.device_name != "Bedroom")
            .collect();
        let err = resolve(&settings(SAMPLE), &entries).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDevice { ref name } if name == "Bedroom"));
    }

    #[test]
    fn bad_enum_fails_construction() {
        let raw = SAMPLE.replace("fan_mode: low", "fan_mode: turbo");
        let err = resolve(&settings(&raw), &directory()).unwrap_err();
        assert!(matches!(err, ConfigError::Enum { ref climate, .. } if climate == "Bedroom"));
    }

    #[test]
    fn membership_errors_are_fatal() {
        let unknown = SAMPLE.replace("    - Bedroom\n", "    - Bedroom\n    - Attic\n");
        assert!(matches!(
            resolve(&settings(&unknown), &directory()),
            Err(ConfigError::UnknownZoneMember { .. })
        ));

        let unzoned = SAMPLE.replace("    - Bedroom\n", "");
        assert!(matches!(
            resolve(&settings(&unzoned), &directory()),
            Err(ConfigError::Unzoned { .. })
        ));

        let twice = format!("{SAMPLE}  Upstairs:\n    - Bedroom\n");
        assert!(matches!(
            resolve(&settings(&twice), &directory()),
            Err(ConfigError::MultipleZones { .. })
        ));

        let mixed = SAMPLE.replacen("clamp: aaa/ddd", "clamp: zzz/ddd", 1);
        assert!(matches!(
            resolve(&settings(&mixed), &directory()),
            Err(ConfigError::ClampMismatch { .. })
        ));
    }

    #[test]
    fn resolves_set_targets() {
        let fleet = resolve(&settings(SAMPLE), &directory()).unwrap();
        let topology = &fleet.topology;
        let bedroom = topology.device_by_name("Bedroom").unwrap();
        let living = topology.device_by_name("Living_Room").unwrap();

        assert_eq!(
            topology.resolve_target(&SetTarget::Zone {
                zone: "Home".to_string()
            }),
            Ok(living)
        );
        assert_eq!(
            topology.resolve_target(&SetTarget::Device {
                zone: "Home".to_string(),
                device: "Bedroom".to_string(),
            }),
            Ok(bedroom)
        );
        assert!(matches!(
            topology.resolve_target(&SetTarget::Zone {
                zone: "Garage".to_string()
            }),
            Err(RouteError::UnknownZone(_))
        ));
        assert_eq!(topology.devices_with_sensor("CDEF01234567").collect::<Vec<_>>(), vec![bedroom]);
        assert_eq!(topology.zones_with_clamp("aaa").count(), 1);
    }

    #[test]
    fn secondary_yields_to_primary_mode() {
        let fleet = resolve(&settings(SAMPLE), &directory()).unwrap();
        let home = fleet.topology.zone_by_name("Home").unwrap();
        let bedroom = fleet.topology.device_by_name("Bedroom").unwrap();
        let cool = Command::on(Mode::Cool, 21.0, FanMode::Auto);
        let off = Command::off(None, 21.0, FanMode::Auto);

        assert!(home.permits(bedroom, &cool, None));
        assert!(home.permits(bedroom, &cool, Some(Mode::Cool)));
        assert!(!home.permits(bedroom, &cool, Some(Mode::Heat)));
        assert!(home.permits(bedroom, &off, Some(Mode::Heat)));
        assert!(home.permits(home.primary, &cool, Some(Mode::Heat)));
    }
}
