use serde::{Deserialize, Serialize};

use crate::{
    config::{
        ClimateConfig, Clamp, MAX_TARGET_HUMIDITY, MAX_TARGET_TEMP, MIN_TARGET_HUMIDITY,
        MIN_TARGET_TEMP,
    },
    error::ConfigError,
    types::{Action, Command, FanMode, Mode, PowerState, PresetMode, Reading},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub usize);

/// A validated user mutation addressed to one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Change {
    TargetTemp(f32),
    TargetHumidity(f32),
    Mode(Mode),
    FanMode(FanMode),
    PresetMode(PresetMode),
    Power(PowerState),
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub device_id: String,
    pub temp_device_id: String,
    pub clamp: Clamp,
    pub zone: ZoneId,
    pub primary: bool,

    target_temp: f32,
    target_humidity: f32,
    mode: Mode,
    // Restored by a power ON after a power OFF.
    previous_mode: Mode,
    fan_mode: FanMode,
    preset_mode: PresetMode,

    reading: Option<Reading>,
    reading_received_ms: Option<u64>,

    last_command: Option<Command>,
    last_sent_ms: Option<u64>,
    action: Action,
}

impl Device {
    pub(crate) fn from_config(
        id: DeviceId,
        name: &str,
        config: &ClimateConfig,
        device_id: String,
        zone: ZoneId,
    ) -> Result<Self, ConfigError> {
        let enum_error = |source| ConfigError::Enum {
            climate: name.to_string(),
            source,
        };
        let mode: Mode = config.mode.parse().map_err(enum_error)?;
        let fan_mode: FanMode = config.fan_mode.parse().map_err(enum_error)?;
        let preset_mode: PresetMode = config.preset_mode.parse().map_err(enum_error)?;
        let clamp = Clamp::parse(&config.clamp).ok_or_else(|| {
            ConfigError::invalid(
                format!("climates.{name}.clamp"),
                "must look like '<clamp id>/<channel>'",
            )
        })?;

        Ok(Self {
            id,
            name: name.to_string(),
            device_id,
            temp_device_id: config.temp_device_id.clone(),
            clamp,
            zone,
            primary: config.primary,
            target_temp: round_tenths(config.temperature),
            target_humidity: config.humidity.round(),
            mode,
            previous_mode: if mode == Mode::Off { Mode::Auto } else { mode },
            fan_mode,
            preset_mode,
            reading: None,
            reading_received_ms: None,
            last_command: None,
            last_sent_ms: None,
            action: Action::Off,
        })
    }

    pub fn target_temp(&self) -> f32 {
        self.target_temp
    }

    pub fn target_humidity(&self) -> f32 {
        self.target_humidity
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn fan_mode(&self) -> FanMode {
        self.fan_mode
    }

    pub fn preset_mode(&self) -> PresetMode {
        self.preset_mode
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn reading(&self) -> Option<&Reading> {
        self.reading.as_ref()
    }

    pub fn last_command(&self) -> Option<&Command> {
        self.last_command.as_ref()
    }

    pub fn last_sent_ms(&self) -> Option<u64> {
        self.last_sent_ms
    }

    pub fn set_target_temp(&mut self, temp: f32) -> bool {
        let clamped = round_tenths(temp.clamp(MIN_TARGET_TEMP, MAX_TARGET_TEMP));
        if (self.target_temp - clamped).abs() > f32::EPSILON {
            self.target_temp = clamped;
            true
        } else {
            false
        }
    }

    pub fn set_target_humidity(&mut self, humidity: f32) -> bool {
        let clamped = humidity
            .clamp(MIN_TARGET_HUMIDITY, MAX_TARGET_HUMIDITY)
            .round();
        if (self.target_humidity - clamped).abs() > f32::EPSILON {
            self.target_humidity = clamped;
            true
        } else {
            false
        }
    }

    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if self.mode == mode {
            return false;
        }
        if mode == Mode::Off {
            self.previous_mode = self.mode;
        }
        self.mode = mode;
        true
    }

    pub fn set_fan_mode(&mut self, fan_mode: FanMode) -> bool {
        let changed = self.fan_mode != fan_mode;
        self.fan_mode = fan_mode;
        changed
    }

    pub fn set_preset_mode(&mut self, preset_mode: PresetMode) -> bool {
        let changed = self.preset_mode != preset_mode;
        self.preset_mode = preset_mode;
        changed
    }

    pub fn set_power(&mut self, power: PowerState) -> bool {
        match power {
            PowerState::Off => self.set_mode(Mode::Off),
            PowerState::On if self.mode == Mode::Off => {
                self.mode = self.previous_mode;
                true
            }
            PowerState::On => false,
        }
    }

    pub fn apply(&mut self, change: Change) -> bool {
        match change {
            Change::TargetTemp(temp) => self.set_target_temp(temp),
            Change::TargetHumidity(humidity) => self.set_target_humidity(humidity),
            Change::Mode(mode) => self.set_mode(mode),
            Change::FanMode(fan_mode) => self.set_fan_mode(fan_mode),
            Change::PresetMode(preset_mode) => self.set_preset_mode(preset_mode),
            Change::Power(power) => self.set_power(power),
        }
    }

    pub fn record_reading(&mut self, reading: Reading, now_ms: u64) {
        self.reading = Some(Reading {
            temperature: round_tenths(reading.temperature),
            humidity: reading.humidity.round(),
            observed_at: reading.observed_at,
        });
        self.reading_received_ms = Some(now_ms);
    }

    /// The last reading, unless it was received more than `stale_ms` ago.
    pub fn fresh_reading(&self, now_ms: u64, stale_ms: u64) -> Option<&Reading> {
        let received = self.reading_received_ms?;
        if now_ms.saturating_sub(received) < stale_ms {
            self.reading.as_ref()
        } else {
            None
        }
    }

    pub fn record_command(&mut self, command: Command, now_ms: u64) {
        self.last_command = Some(command);
        self.last_sent_ms = Some(now_ms);
    }

    /// Derives the action from a clamp current sample. Returns true when the
    /// action changed.
    pub fn record_current(&mut self, current: f64) -> bool {
        let action = match self.last_command.and_then(|command| command.active_mode()) {
            None => Action::Off,
            Some(_) if current <= 0.0 => Action::Idle,
            Some(Mode::Heat) => Action::Heating,
            Some(Mode::Cool) => Action::Cooling,
            Some(Mode::Dry) => Action::Drying,
            Some(_) => Action::Fan,
        };
        let changed = self.action != action;
        self.action = action;
        changed
    }
}

fn round_tenths(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;

    use super::*;

    pub(crate) fn climate(mode: &str) -> ClimateConfig {
        ClimateConfig {
            temperature: 22.0,
            humidity: 50.0,
            mode: mode.to_string(),
            fan_mode: "auto".to_string(),
            preset_mode: "none".to_string(),
            temp_device_id: "1234567890ab".to_string(),
            clamp: "aaa/ddd".to_string(),
            primary: false,
        }
    }

    pub(crate) fn device(mode: &str) -> Device {
        Device::from_config(
            DeviceId(0),
            "Living_Room",
            &climate(mode),
            "02-ABC".to_string(),
            ZoneId(0),
        )
        .unwrap()
    }

    pub(crate) fn reading(temperature: f32, humidity: f32) -> Reading {
        Reading {
            temperature,
            humidity,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn rejects_unknown_mode_with_climate_name() {
        let err = Device::from_config(
            DeviceId(0),
            "Den",
            &climate("warm"),
            "x".to_string(),
            ZoneId(0),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Enum { ref climate, .. } if climate == "Den"));
    }

    #[test]
    fn target_temp_is_clamped_and_rounded() {
        let mut device = device("heat");
        assert!(device.set_target_temp(23.04));
        assert_eq!(device.target_temp(), 23.0);
        assert!(device.set_target_temp(99.0));
        assert_eq!(device.target_temp(), MAX_TARGET_TEMP);
        assert!(!device.set_target_temp(31.0));
    }

    #[test]
    fn power_off_then_on_restores_mode() {
        let mut device = device("cool");
        assert!(device.apply(Change::Power(PowerState::Off)));
        assert_eq!(device.mode(), Mode::Off);
        assert!(!device.apply(Change::Power(PowerState::Off)));
        assert!(device.apply(Change::Power(PowerState::On)));
        assert_eq!(device.mode(), Mode::Cool);
        assert!(!device.apply(Change::Power(PowerState::On)));
    }

    #[test]
    fn power_on_from_configured_off_defaults_to_auto() {
        let mut device = device("off");
        assert!(device.set_power(PowerState::On));
        assert_eq!(device.mode(), Mode::Auto);
    }

    #[test]
    fn stale_reading_is_ignored() {
        let mut device = device("heat");
        device.record_reading(reading(21.04, 49.6), 1_000);
        assert_eq!(device.fresh_reading(1_500, 1_000).unwrap().temperature, 21.0);
        assert_eq!(device.fresh_reading(1_500, 1_000).unwrap().humidity, 50.0);
        assert!(device.fresh_reading(2_000, 1_000).is_none());
    }

    #[test]
    fn clamp_current_maps_to_action() {
        let mut device = device("heat");
        assert!(!device.record_current(1.2));
        assert_eq!(device.action(), Action::Off);

        device.record_command(Command::on(Mode::Heat, 22.0, FanMode::Auto), 0);
        assert!(device.record_current(1.2));
        assert_eq!(device.action(), Action::Heating);
        assert!(device.record_current(0.0));
        assert_eq!(device.action(), Action::Idle);

        device.record_command(Command::on(Mode::FanOnly, 22.0, FanMode::Auto), 0);
        device.record_current(0.4);
        assert_eq!(device.action(), Action::Fan);
    }
}
