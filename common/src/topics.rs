pub const TOPIC_ROOT: &str = "switchbot_climate";

pub const TOPIC_HEALTHCHECK: &str = "switchbot_climate/healthcheck/status";
pub const HEALTHCHECK_SEGMENT: &str = "healthcheck";
pub const HEALTHCHECK_REQUEST: &str = "CHECK";
pub const HEALTHCHECK_RESPONSE: &str = "OK";

pub const TOPIC_DEVICE_SET_FILTER: &str = "switchbot_climate/+/+/set/+";
pub const TOPIC_ZONE_SET_FILTER: &str = "switchbot_climate/+/set/+";

pub const SENSOR_ROOT: &str = "switchbot";
pub const CLAMP_ROOT: &str = "zigbee2mqtt";

pub const MAX_PAYLOAD_BYTES: usize = 512;
/// Cap for third-party sensor and clamp reports. Stays under rumqttc's
/// default incoming packet limit.
pub const MAX_TELEMETRY_BYTES: usize = 8 * 1024;

/// Largest payload accepted on `topic`: commands in the bridge's own
/// namespace are small, device telemetry is not.
pub fn payload_limit(topic: &str) -> usize {
    match topic.split_once('/') {
        Some((TOPIC_ROOT, _)) => MAX_PAYLOAD_BYTES,
        _ => MAX_TELEMETRY_BYTES,
    }
}

pub fn device_state_topic(zone: &str, device: &str) -> String {
    format!("{TOPIC_ROOT}/{zone}/{device}/state")
}

pub fn zone_state_topic(zone: &str) -> String {
    format!("{TOPIC_ROOT}/{zone}/state")
}

pub fn device_set_topic(zone: &str, device: &str, attribute: &str) -> String {
    format!("{TOPIC_ROOT}/{zone}/{device}/set/{attribute}")
}

pub fn zone_set_topic(zone: &str, attribute: &str) -> String {
    format!("{TOPIC_ROOT}/{zone}/set/{attribute}")
}

pub fn sensor_status_topic(temp_device_id: &str) -> String {
    format!("{SENSOR_ROOT}/{temp_device_id}/status")
}

pub fn clamp_topic(clamp_id: &str) -> String {
    format!("{CLAMP_ROOT}/{clamp_id}")
}

/// Zone and device names become topic levels.
pub fn is_topic_safe(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '+', '#']) && name != HEALTHCHECK_SEGMENT
}
