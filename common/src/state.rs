use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Action, Command, FanMode, Mode, PowerState, PresetMode};

/// Retained payload on `switchbot_climate/{zone}/{device}/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub name: String,
    pub zone: String,
    pub primary: bool,
    pub target_temp: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temp_low: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temp_high: Option<f32>,
    pub target_humidity: f32,
    pub mode: Mode,
    pub fan_mode: FanMode,
    pub preset_mode: PresetMode,
    pub current_temperature: Option<f32>,
    pub current_humidity: Option<f32>,
    pub observed_at: Option<DateTime<Utc>>,
    pub action: Action,
    pub actuator: Option<ActuatorState>,
}

impl DeviceState {
    /// Mode the actuator was last told to run in.
    pub fn active_mode(&self) -> Option<Mode> {
        self.actuator
            .as_ref()
            .filter(|actuator| actuator.power == PowerState::On)
            .map(|actuator| actuator.mode)
    }
}

/// Last command the remote accepted for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub power: PowerState,
    pub mode: Mode,
    pub setpoint: i32,
    pub fan_mode: FanMode,
    pub send_state: String,
}

impl From<&Command> for ActuatorState {
    fn from(command: &Command) -> Self {
        Self {
            power: command.power,
            mode: command.mode,
            setpoint: command.setpoint,
            fan_mode: command.fan_mode,
            send_state: command.set_all_parameter(),
        }
    }
}

/// Retained payload on `switchbot_climate/{zone}/state`, mirroring the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    pub name: String,
    pub primary: String,
    pub members: Vec<String>,
    pub state: DeviceState,
}
