use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, topics::is_topic_safe};

pub const MIN_TARGET_TEMP: f32 = 16.0;
pub const MAX_TARGET_TEMP: f32 = 30.0;
pub const AWAY_MIN_TEMP: f32 = 10.0;
pub const MIN_TARGET_HUMIDITY: f32 = 30.0;
pub const MAX_TARGET_HUMIDITY: f32 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_user: Option<String>,
    #[serde(default)]
    pub mqtt_pass: Option<String>,
    #[serde(default = "default_client_id")]
    pub mqtt_client_id: String,
    pub token: String,
    pub key: String,
    #[serde(default = "default_temperature_tol")]
    pub temperature_tol: f32,
    #[serde(default = "default_humidity_tol")]
    pub humidity_tol: f32,
    #[serde(default = "default_eco_offset")]
    pub eco_offset: f32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_sensor_stale_secs")]
    pub sensor_stale_secs: u64,
    pub climates: BTreeMap<String, ClimateConfig>,
    pub zones: BTreeMap<String, Vec<String>>,
}

/// One `climates` entry. Enum fields stay textual until `resolve` so that a
/// bad value is reported against the climate it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClimateConfig {
    pub temperature: f32,
    pub humidity: f32,
    pub mode: String,
    pub fan_mode: String,
    pub preset_mode: String,
    pub temp_device_id: String,
    pub clamp: String,
    #[serde(default)]
    pub primary: bool,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "switchbot-climate".to_string()
}

fn default_temperature_tol() -> f32 {
    3.0
}

fn default_humidity_tol() -> f32 {
    5.0
}

fn default_eco_offset() -> f32 {
    2.0
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_reconcile_interval_secs() -> u64 {
    900
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_sensor_stale_secs() -> u64 {
    600
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt_host.trim().is_empty() {
            return Err(ConfigError::invalid("mqtt_host", "cannot be empty"));
        }
        if self.mqtt_port == 0 {
            return Err(ConfigError::invalid("mqtt_port", "must be between 1 and 65535"));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::invalid("token", "cannot be empty"));
        }
        if self.key.trim().is_empty() {
            return Err(ConfigError::invalid("key", "cannot be empty"));
        }
        if !(self.temperature_tol.is_finite() && self.temperature_tol > 0.0) {
            return Err(ConfigError::invalid("temperature_tol", "must be positive"));
        }
        if !(self.humidity_tol.is_finite() && self.humidity_tol >= 0.0) {
            return Err(ConfigError::invalid("humidity_tol", "must not be negative"));
        }
        if !(self.eco_offset.is_finite() && self.eco_offset >= 0.0) {
            return Err(ConfigError::invalid("eco_offset", "must not be negative"));
        }
        for (field, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("reconcile_interval_secs", self.reconcile_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("sensor_stale_secs", self.sensor_stale_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.climates.is_empty() {
            return Err(ConfigError::invalid("climates", "at least one climate is required"));
        }
        for (name, climate) in &self.climates {
            if !is_topic_safe(name) {
                return Err(ConfigError::invalid(
                    format!("climates.{name}"),
                    "name cannot be empty, 'healthcheck', or contain '/', '+' or '#'",
                ));
            }
            climate.validate(name)?;
        }
        for zone in self.zones.keys() {
            if !is_topic_safe(zone) {
                return Err(ConfigError::invalid(
                    format!("zones.{zone}"),
                    "name cannot be empty, 'healthcheck', or contain '/', '+' or '#'",
                ));
            }
        }
        Ok(())
    }
}

impl ClimateConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let field = |key: &str| format!("climates.{name}.{key}");

        if !(MIN_TARGET_TEMP..=MAX_TARGET_TEMP).contains(&self.temperature) {
            return Err(ConfigError::invalid(
                field("temperature"),
                format!("must be between {MIN_TARGET_TEMP} and {MAX_TARGET_TEMP}"),
            ));
        }
        if !(MIN_TARGET_HUMIDITY..=MAX_TARGET_HUMIDITY).contains(&self.humidity) {
            return Err(ConfigError::invalid(
                field("humidity"),
                format!("must be between {MIN_TARGET_HUMIDITY} and {MAX_TARGET_HUMIDITY}"),
            ));
        }
        if !is_sensor_id(&self.temp_device_id) {
            return Err(ConfigError::invalid(
                field("temp_device_id"),
                "must be exactly 12 hexadecimal digits",
            ));
        }
        if Clamp::parse(&self.clamp).is_none() {
            return Err(ConfigError::invalid(
                field("clamp"),
                "must look like '<clamp id>/<channel>'",
            ));
        }
        Ok(())
    }
}

/// A current clamp and the channel within its report that meters this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clamp {
    pub id: String,
    pub channel: String,
}

impl Clamp {
    pub fn parse(raw: &str) -> Option<Self> {
        let (id, channel) = raw.split_once('/')?;
        let id_ok = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace());
        let channel_ok = !channel.is_empty()
            && channel
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        (id_ok && channel_ok).then(|| Self {
            id: id.to_string(),
            channel: channel.to_string(),
        })
    }
}

fn is_sensor_id(raw: &str) -> bool {
    raw.len() == 12 && raw.chars().all(|c| c.is_ascii_hexdigit())
}
