use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnumParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Off,
    Auto,
    Cool,
    Heat,
    Dry,
    FanOnly,
}

impl Mode {
    const EXPECTED: &'static str = "off, auto, cool, heat, dry, fan_only";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Cool => "cool",
            Self::Heat => "heat",
            Self::Dry => "dry",
            Self::FanOnly => "fan_only",
        }
    }
}

impl FromStr for Mode {
    type Err = EnumParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            "cool" => Ok(Self::Cool),
            "heat" => Ok(Self::Heat),
            "dry" => Ok(Self::Dry),
            "fan_only" => Ok(Self::FanOnly),
            _ => Err(EnumParseError {
                kind: "mode",
                value: value.to_string(),
                expected: Self::EXPECTED,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    Auto,
    Low,
    Medium,
    High,
}

impl FanMode {
    const EXPECTED: &'static str = "auto, low, medium, high";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for FanMode {
    type Err = EnumParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(Self::Auto),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(EnumParseError {
                kind: "fan mode",
                value: value.to_string(),
                expected: Self::EXPECTED,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetMode {
    None,
    Eco,
    Boost,
    Away,
}

impl PresetMode {
    const EXPECTED: &'static str = "none, eco, boost, away";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Eco => "eco",
            Self::Boost => "boost",
            Self::Away => "away",
        }
    }
}

impl FromStr for PresetMode {
    type Err = EnumParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "eco" => Ok(Self::Eco),
            "boost" => Ok(Self::Boost),
            "away" => Ok(Self::Away),
            _ => Err(EnumParseError {
                kind: "preset mode",
                value: value.to_string(),
                expected: Self::EXPECTED,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

impl FromStr for PowerState {
    type Err = EnumParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            _ => Err(EnumParseError {
                kind: "power state",
                value: value.to_string(),
                expected: "ON, OFF",
            }),
        }
    }
}

/// What the equipment is observed doing, derived from clamp current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Off,
    Idle,
    Heating,
    Cooling,
    Drying,
    Fan,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::Drying => "drying",
            Self::Fan => "fan",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Mode, FanMode, PresetMode, PowerState, Action);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    pub observed_at: DateTime<Utc>,
}

/// One actuation of an IR air conditioner. `mode` is always a concrete
/// operating mode, never `Off` or `Auto`; power carries on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub power: PowerState,
    pub mode: Mode,
    pub setpoint: i32,
    pub fan_mode: FanMode,
}

impl Command {
    pub fn on(mode: Mode, setpoint: f32, fan_mode: FanMode) -> Self {
        Self {
            power: PowerState::On,
            mode,
            setpoint: setpoint.round() as i32,
            fan_mode,
        }
    }

    pub fn off(last_mode: Option<Mode>, setpoint: f32, fan_mode: FanMode) -> Self {
        Self {
            power: PowerState::Off,
            mode: last_mode.unwrap_or(Mode::FanOnly),
            setpoint: setpoint.round() as i32,
            fan_mode,
        }
    }

    pub fn is_on(&self) -> bool {
        self.power == PowerState::On
    }

    /// Mode the equipment is running in, `None` while powered off.
    pub fn active_mode(&self) -> Option<Mode> {
        self.is_on().then_some(self.mode)
    }

    /// Two OFF commands leave the equipment in the same state regardless of
    /// the setpoint or fan they carry.
    pub fn same_effect(&self, other: &Command) -> bool {
        if !self.is_on() && !other.is_on() {
            return true;
        }
        self == other
    }

    /// SwitchBot `setAll` parameter: `setpoint,mode,fan,power`.
    pub fn set_all_parameter(&self) -> String {
        let power = match self.power {
            PowerState::On => "on",
            PowerState::Off => "off",
        };
        format!(
            "{},{},{},{}",
            self.setpoint,
            remote_mode_code(self.mode),
            remote_fan_code(self.fan_mode),
            power
        )
    }
}

pub fn remote_mode_code(mode: Mode) -> u8 {
    match mode {
        Mode::Off => 0,
        Mode::Auto => 1,
        Mode::Cool => 2,
        Mode::Dry => 3,
        Mode::FanOnly => 4,
        Mode::Heat => 5,
    }
}

pub fn remote_fan_code(fan_mode: FanMode) -> u8 {
    match fan_mode {
        FanMode::Auto => 1,
        FanMode::Low => 2,
        FanMode::Medium => 3,
        FanMode::High => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_mode() {
        for mode in [
            Mode::Off,
            Mode::Auto,
            Mode::Cool,
            Mode::Heat,
            Mode::Dry,
            Mode::FanOnly,
        ] {
            assert_eq!(mode.as_str().parse::<Mode>(), Ok(mode));
        }
    }

    #[test]
    fn rejects_unknown_values_without_defaulting() {
        let err = "turbo".parse::<FanMode>().unwrap_err();
        assert_eq!(err.kind, "fan mode");
        assert_eq!(err.value, "turbo");
        assert!("".parse::<PresetMode>().is_err());
        assert!("Heat".parse::<Mode>().is_err());
    }

    #[test]
    fn power_state_is_case_insensitive() {
        assert_eq!("on".parse::<PowerState>(), Ok(PowerState::On));
        assert_eq!("OFF".parse::<PowerState>(), Ok(PowerState::Off));
        assert!("toggle".parse::<PowerState>().is_err());
    }

    #[test]
    fn set_all_parameter_uses_remote_codes() {
        let command = Command::on(Mode::Heat, 21.6, FanMode::Medium);
        assert_eq!(command.set_all_parameter(), "22,5,3,on");

        let off = Command::off(None, 22.0, FanMode::Auto);
        assert_eq!(off.set_all_parameter(), "22,4,1,off");
    }

    #[test]
    fn off_commands_share_effect() {
        let a = Command::off(Some(Mode::Heat), 20.0, FanMode::Auto);
        let b = Command::off(Some(Mode::Cool), 25.0, FanMode::High);
        assert!(a.same_effect(&b));

        let on = Command::on(Mode::Heat, 20.0, FanMode::Auto);
        assert!(!on.same_effect(&a));
        assert!(!on.same_effect(&Command::on(Mode::Heat, 21.0, FanMode::Auto)));
    }
}
