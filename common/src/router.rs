use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    device::Change,
    error::RouteError,
    topics::{
        payload_limit, CLAMP_ROOT, HEALTHCHECK_REQUEST, HEALTHCHECK_SEGMENT, SENSOR_ROOT,
        TOPIC_ROOT,
    },
    types::{FanMode, Mode, PowerState, PresetMode},
    zone::SetTarget,
};

/// A decoded inbound bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Set { target: SetTarget, change: Change },
    HealthCheck,
    SensorStatus {
        temp_device_id: String,
        temperature: f32,
        humidity: f32,
    },
    ClampReport {
        clamp_id: String,
        currents: Map<String, Value>,
    },
}

#[derive(Debug, Deserialize)]
struct SensorStatusPayload {
    temperature: f32,
    humidity: f32,
}

/// Decodes one message. `Ok(None)` for traffic the bridge sees but ignores,
/// such as its own healthcheck reply.
pub fn parse_inbound(topic: &str, payload: &[u8]) -> Result<Option<Inbound>, RouteError> {
    if payload.len() > payload_limit(topic) {
        return Err(RouteError::Oversized {
            topic: topic.to_string(),
            len: payload.len(),
        });
    }
    let text = std::str::from_utf8(payload)
        .map_err(|_| RouteError::NotUtf8 {
            topic: topic.to_string(),
        })?
        .trim();

    let levels: Vec<&str> = topic.split('/').collect();
    match levels.as_slice() {
        [TOPIC_ROOT, HEALTHCHECK_SEGMENT, "status"] => {
            Ok((text == HEALTHCHECK_REQUEST).then_some(Inbound::HealthCheck))
        }
        [TOPIC_ROOT, zone, "set", attribute] => Ok(Some(Inbound::Set {
            target: SetTarget::Zone {
                zone: zone.to_string(),
            },
            change: parse_change(attribute, text)?,
        })),
        [TOPIC_ROOT, zone, device, "set", attribute] => Ok(Some(Inbound::Set {
            target: SetTarget::Device {
                zone: zone.to_string(),
                device: device.to_string(),
            },
            change: parse_change(attribute, text)?,
        })),
        [SENSOR_ROOT, temp_device_id, "status"] => {
            let status = parse_sensor_status(text)?;
            Ok(Some(Inbound::SensorStatus {
                temp_device_id: temp_device_id.to_string(),
                temperature: status.temperature,
                humidity: status.humidity,
            }))
        }
        [CLAMP_ROOT, clamp_id] => {
            let currents = serde_json::from_str::<Map<String, Value>>(text).map_err(|err| {
                RouteError::InvalidPayload {
                    attribute: "clamp report",
                    payload: text.to_string(),
                    reason: err.to_string(),
                }
            })?;
            Ok(Some(Inbound::ClampReport {
                clamp_id: clamp_id.to_string(),
                currents,
            }))
        }
        _ => Err(RouteError::UnknownTopic(topic.to_string())),
    }
}

pub fn parse_change(attribute: &str, text: &str) -> Result<Change, RouteError> {
    let invalid = |attribute: &'static str, reason: String| RouteError::InvalidPayload {
        attribute,
        payload: text.to_string(),
        reason,
    };

    match attribute {
        "target_temp" => parse_number(text)
            .map(Change::TargetTemp)
            .map_err(|reason| invalid("target_temp", reason)),
        "target_humidity" => parse_number(text)
            .map(Change::TargetHumidity)
            .map_err(|reason| invalid("target_humidity", reason)),
        "mode" => text
            .to_ascii_lowercase()
            .parse::<Mode>()
            .map(Change::Mode)
            .map_err(|err| invalid("mode", err.to_string())),
        "fan_mode" => text
            .to_ascii_lowercase()
            .parse::<FanMode>()
            .map(Change::FanMode)
            .map_err(|err| invalid("fan_mode", err.to_string())),
        "preset_mode" => text
            .to_ascii_lowercase()
            .parse::<PresetMode>()
            .map(Change::PresetMode)
            .map_err(|err| invalid("preset_mode", err.to_string())),
        "power" => text
            .parse::<PowerState>()
            .map(Change::Power)
            .map_err(|err| invalid("power", err.to_string())),
        other => Err(RouteError::UnknownAttribute(other.to_string())),
    }
}

fn parse_number(text: &str) -> Result<f32, String> {
    let value: f32 = text.parse().map_err(|_| "not a number".to_string())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err("must be finite".to_string())
    }
}

fn parse_sensor_status(text: &str) -> Result<SensorStatusPayload, RouteError> {
    let invalid = |reason: String| RouteError::InvalidPayload {
        attribute: "sensor status",
        payload: text.to_string(),
        reason,
    };
    let status: SensorStatusPayload =
        serde_json::from_str(text).map_err(|err| invalid(err.to_string()))?;
    if !(-40.0..=85.0).contains(&status.temperature) {
        return Err(invalid("temperature out of range".to_string()));
    }
    if !(0.0..=100.0).contains(&status.humidity) {
        return Err(invalid("humidity out of range".to_string()));
    }
    Ok(status)
}

/// Current drawn on one channel of a clamp report.
pub fn clamp_current(currents: &Map<String, Value>, channel: &str) -> Option<f64> {
    currents.get(channel).and_then(Value::as_f64)
}
