use crate::{
    config::{Settings, AWAY_MIN_TEMP, MAX_TARGET_TEMP, MIN_TARGET_TEMP},
    device::Device,
    state::{ActuatorState, DeviceState},
    types::{Command, FanMode, Mode, PresetMode, Reading},
};

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub hysteresis: f32,
    pub humidity_tolerance: f32,
    pub eco_offset: f32,
    pub reconcile_interval_ms: u64,
    pub sensor_stale_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            hysteresis: 3.0,
            humidity_tolerance: 5.0,
            eco_offset: 2.0,
            reconcile_interval_ms: 900_000,
            sensor_stale_ms: 600_000,
        }
    }
}

impl From<&Settings> for ControlConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            hysteresis: settings.temperature_tol,
            humidity_tolerance: settings.humidity_tol,
            eco_offset: settings.eco_offset,
            reconcile_interval_ms: settings.reconcile_interval_secs.saturating_mul(1_000),
            sensor_stale_ms: settings.sensor_stale_secs.saturating_mul(1_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The command differs from the last one the actuator accepted.
    Send,
    /// Unchanged, but the reconciliation interval elapsed.
    Reassert,
    /// Unchanged and recently confirmed.
    Suppress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub command: Command,
    pub dispatch: Dispatch,
}

impl Decision {
    pub fn should_send(&self) -> bool {
        self.dispatch != Dispatch::Suppress
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControlEngine {
    pub config: ControlConfig,
}

impl ControlEngine {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    pub fn hysteresis_for(&self, device: &Device) -> f32 {
        match device.preset_mode() {
            PresetMode::Eco => self.config.hysteresis + self.config.eco_offset,
            _ => self.config.hysteresis,
        }
    }

    /// Decides the command for one device and whether it must go out. `None`
    /// when there is nothing to act on yet (no reading and nothing sent).
    pub fn evaluate(&self, device: &Device, now_ms: u64) -> Option<Decision> {
        let command = self.desired_command(device, now_ms)?;
        Some(Decision {
            command,
            dispatch: self.dispatch_for(device, &command, now_ms),
        })
    }

    pub fn dispatch_for(&self, device: &Device, command: &Command, now_ms: u64) -> Dispatch {
        match (device.last_command(), device.last_sent_ms()) {
            (Some(last), Some(sent_ms)) if last.same_effect(command) => {
                if now_ms.saturating_sub(sent_ms) >= self.config.reconcile_interval_ms {
                    Dispatch::Reassert
                } else {
                    Dispatch::Suppress
                }
            }
            _ => Dispatch::Send,
        }
    }

    pub fn desired_command(&self, device: &Device, now_ms: u64) -> Option<Command> {
        let previous = device.last_command();
        let target = device.target_temp();
        let fan = self.effective_fan(device);
        let off = Command::off(previous.map(|command| command.mode), target, fan);

        if device.mode() == Mode::Off {
            return Some(off);
        }

        let reading = device.fresh_reading(now_ms, self.config.sensor_stale_ms);

        if device.preset_mode() == PresetMode::Away {
            return match reading {
                Some(reading) => Some(self.away_command(reading, target, fan)),
                None => previous.copied(),
            };
        }

        let dry = reading.and_then(|reading| self.humidity_override(device, reading, fan));
        if dry.is_some() {
            return dry;
        }

        let on = |mode| Command::on(mode, target, fan);
        // Inside the band the actuator keeps doing what it was doing.
        let hold = |direction: Mode| match previous.and_then(Command::active_mode) {
            Some(active) if active == direction => on(direction),
            _ => off,
        };

        match device.mode() {
            Mode::Off => Some(off),
            Mode::Dry => Some(on(Mode::Dry)),
            Mode::FanOnly => Some(on(Mode::FanOnly)),
            Mode::Heat | Mode::Cool | Mode::Auto => {
                let Some(reading) = reading else {
                    return previous.copied();
                };
                let delta = reading.temperature - target;
                let band = self.hysteresis_for(device);

                let command = match device.mode() {
                    Mode::Heat if delta <= -band => on(Mode::Heat),
                    Mode::Heat if delta >= band => off,
                    Mode::Heat => hold(Mode::Heat),
                    Mode::Cool if delta >= band => on(Mode::Cool),
                    Mode::Cool if delta <= -band => off,
                    Mode::Cool => hold(Mode::Cool),
                    _ if delta <= -band => on(Mode::Heat),
                    _ if delta >= band => on(Mode::Cool),
                    _ => match previous.and_then(Command::active_mode) {
                        Some(active @ (Mode::Heat | Mode::Cool)) => on(active),
                        _ => off,
                    },
                };
                Some(command)
            }
        }
    }

    fn effective_fan(&self, device: &Device) -> FanMode {
        match device.preset_mode() {
            PresetMode::Boost => FanMode::High,
            _ => device.fan_mode(),
        }
    }

    fn away_command(&self, reading: &Reading, target: f32, fan: FanMode) -> Command {
        if reading.temperature >= MAX_TARGET_TEMP {
            Command::on(Mode::Cool, MAX_TARGET_TEMP, fan)
        } else if reading.temperature < AWAY_MIN_TEMP {
            Command::on(Mode::Heat, MIN_TARGET_TEMP, fan)
        } else {
            Command::on(Mode::FanOnly, target, FanMode::Auto)
        }
    }

    fn humidity_override(
        &self,
        device: &Device,
        reading: &Reading,
        fan: FanMode,
    ) -> Option<Command> {
        if device.mode() == Mode::Dry {
            return None;
        }
        let target = device.target_humidity();
        let tolerance = self.config.humidity_tolerance;
        let drying = device.last_command().and_then(Command::active_mode) == Some(Mode::Dry);

        let humid = reading.humidity > target + tolerance;
        if humid || (drying && reading.humidity >= target - tolerance) {
            Some(Command::on(Mode::Dry, device.target_temp(), fan))
        } else {
            None
        }
    }

    /// Full retained state of a device as published on its state topic.
    pub fn device_state(&self, device: &Device, zone: &str) -> DeviceState {
        let target = device.target_temp();
        let band = self.hysteresis_for(device);
        let (low, high) = match (device.preset_mode(), device.mode()) {
            (PresetMode::Away, _) => (Some(AWAY_MIN_TEMP), Some(MAX_TARGET_TEMP)),
            (_, Mode::Auto) => (
                Some(round_tenths(target - band)),
                Some(round_tenths(target + band)),
            ),
            _ => (None, None),
        };
        let reading = device.reading();

        DeviceState {
            name: device.name.clone(),
            zone: zone.to_string(),
            primary: device.primary,
            target_temp: target,
            target_temp_low: low,
            target_temp_high: high,
            target_humidity: device.target_humidity(),
            mode: device.mode(),
            fan_mode: device.fan_mode(),
            preset_mode: device.preset_mode(),
            current_temperature: reading.map(|reading| reading.temperature),
            current_humidity: reading.map(|reading| reading.humidity),
            observed_at: reading.map(|reading| reading.observed_at),
            action: device.action(),
            actuator: device.last_command().map(ActuatorState::from),
        }
    }
}

fn round_tenths(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
