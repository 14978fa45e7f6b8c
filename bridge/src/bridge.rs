use std::{sync::Arc, time::Duration};

use chrono::Utc;
use climate_common::{
    clamp_current, device_state_topic, parse_inbound, zone_state_topic, Change, Command,
    ControlEngine, Device, DeviceId, Dispatch, Inbound, PowerState, Reading, RouteError,
    SetTarget, ZoneId, ZoneState, HEALTHCHECK_RESPONSE, TOPIC_HEALTHCHECK,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{bus::Publisher, error::BusError, gateway::Gateway, registry::Registry};

/// Holds the device registry and the two outside handles. Inbound messages
/// and control ticks both end up in the same per-device cycle: lock, decide,
/// actuate, publish.
pub struct Bridge {
    registry: Registry,
    engine: ControlEngine,
    gateway: Arc<dyn Gateway>,
    publisher: Arc<dyn Publisher>,
    request_timeout: Duration,
}

impl Bridge {
    pub fn new(
        registry: Registry,
        engine: ControlEngine,
        gateway: Arc<dyn Gateway>,
        publisher: Arc<dyn Publisher>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            engine,
            gateway,
            publisher,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Polls and reconciles every zone concurrently. One device failing
    /// does not hold up the others.
    pub async fn tick(self: &Arc<Self>, now_ms: u64) {
        let mut cycles = JoinSet::new();
        for zone in self.registry.topology().zones() {
            let bridge = Arc::clone(self);
            let zone = zone.id;
            cycles.spawn(async move { bridge.reconcile_zone(zone, now_ms).await });
        }
        join_all(cycles, "zone").await;
    }

    /// The primary settles first so its secondaries arbitrate against the
    /// mode it is running now, not the one from the previous tick.
    async fn reconcile_zone(self: Arc<Self>, zone: ZoneId, now_ms: u64) {
        let zone = self.registry.topology().zone(zone);
        self.reconcile(zone.primary, now_ms).await;

        let mut secondaries = JoinSet::new();
        for &id in zone.devices.iter().filter(|id| !zone.is_primary(**id)) {
            let bridge = Arc::clone(&self);
            secondaries.spawn(async move { bridge.reconcile(id, now_ms).await });
        }
        join_all(secondaries, "device").await;
    }

    pub async fn reconcile(&self, id: DeviceId, now_ms: u64) {
        let mut device = self.registry.slot(id).device.lock().await;

        let read = tokio::time::timeout(
            self.request_timeout,
            self.gateway.read_sensor(&device.temp_device_id),
        )
        .await;
        match read {
            Ok(Ok(reading)) => device.record_reading(reading, now_ms),
            Ok(Err(err)) => warn!("{}: sensor read failed: {err}", device.name),
            Err(_) => warn!(
                "{}: sensor read timed out after {:?}",
                device.name, self.request_timeout
            ),
        }

        self.actuate(id, &mut device, now_ms).await;
        self.publish_state(id, &device, false).await;
    }

    /// Entry point for every bus delivery. Never fails: a bad message is
    /// logged and dropped.
    pub async fn handle_message(&self, topic: &str, payload: &[u8], now_ms: u64) {
        let inbound = match parse_inbound(topic, payload) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return,
            Err(err) => {
                warn!("dropping message: {err}");
                return;
            }
        };
        if let Err(err) = self.dispatch(inbound, now_ms).await {
            warn!("dropping message on {topic}: {err}");
        }
    }

    async fn dispatch(&self, inbound: Inbound, now_ms: u64) -> Result<(), RouteError> {
        match inbound {
            Inbound::Set { target, change } => self.apply_change(&target, change, now_ms).await,
            Inbound::HealthCheck => {
                let reply = self
                    .publisher
                    .publish(TOPIC_HEALTHCHECK, HEALTHCHECK_RESPONSE.as_bytes().to_vec(), false)
                    .await;
                if let Err(err) = reply {
                    warn!("healthcheck reply failed: {err}");
                }
                Ok(())
            }
            Inbound::SensorStatus {
                temp_device_id,
                temperature,
                humidity,
            } => {
                let reading = Reading {
                    temperature,
                    humidity,
                    observed_at: Utc::now(),
                };
                self.record_reading(&temp_device_id, reading, now_ms).await;
                Ok(())
            }
            Inbound::ClampReport { clamp_id, currents } => {
                self.record_clamp(&clamp_id, &currents).await;
                Ok(())
            }
        }
    }

    async fn apply_change(
        &self,
        target: &SetTarget,
        change: Change,
        now_ms: u64,
    ) -> Result<(), RouteError> {
        let id = self.registry.topology().resolve_target(target)?;
        let mode_changed = {
            let mut device = self.registry.slot(id).device.lock().await;
            if device.apply(change) {
                info!("{}: applied {change:?}", device.name);
            } else {
                debug!("{}: {change:?} is already in effect", device.name);
            }
            let mode_changed = self.actuate(id, &mut device, now_ms).await;
            self.publish_state(id, &device, true).await;
            mode_changed
        };
        if mode_changed {
            self.resync_secondaries(id, now_ms).await;
        }
        Ok(())
    }

    async fn record_reading(&self, temp_device_id: &str, reading: Reading, now_ms: u64) {
        let topology = self.registry.topology();
        let ids: Vec<DeviceId> = topology.devices_with_sensor(temp_device_id).collect();
        if ids.is_empty() {
            debug!("no device uses sensor {temp_device_id}");
        }
        for id in ids {
            let mode_changed = {
                let mut device = self.registry.slot(id).device.lock().await;
                device.record_reading(reading, now_ms);
                let mode_changed = self.actuate(id, &mut device, now_ms).await;
                self.publish_state(id, &device, false).await;
                mode_changed
            };
            if mode_changed {
                self.resync_secondaries(id, now_ms).await;
            }
        }
    }

    /// Re-runs arbitration for the rest of a zone after its primary started
    /// or stopped running a mode. Must be called without the primary's lock.
    async fn resync_secondaries(&self, id: DeviceId, now_ms: u64) {
        let zone = self.registry.topology().zone_of(id);
        if !zone.is_primary(id) {
            return;
        }
        for &member in zone.devices.iter().filter(|member| **member != id) {
            let mut device = self.registry.slot(member).device.lock().await;
            debug!("{}: re-checking against zone {} primary", device.name, zone.name);
            self.actuate(member, &mut device, now_ms).await;
            self.publish_state(member, &device, false).await;
        }
    }

    async fn record_clamp(&self, clamp_id: &str, currents: &Map<String, Value>) {
        let topology = self.registry.topology();
        for zone in topology.zones_with_clamp(clamp_id) {
            for &id in &zone.devices {
                let mut device = self.registry.slot(id).device.lock().await;
                let Some(current) = clamp_current(currents, &device.clamp.channel) else {
                    continue;
                };
                if device.record_current(current) {
                    debug!("{}: action is now {}", device.name, device.action());
                    self.publish_state(id, &device, false).await;
                }
            }
        }
    }

    /// Runs the engine for one locked device and sends the result when it
    /// has to go out. Only a confirmed send is recorded. Returns true when
    /// that send changed the mode the unit is actively running.
    async fn actuate(&self, id: DeviceId, device: &mut Device, now_ms: u64) -> bool {
        let Some(decision) = self.engine.evaluate(device, now_ms) else {
            debug!("{}: no reading yet", device.name);
            return false;
        };
        let active_before = device.last_command().and_then(Command::active_mode);

        let command = self.arbitrate(id, device, decision.command);
        let dispatch = if command == decision.command {
            decision.dispatch
        } else {
            self.engine.dispatch_for(device, &command, now_ms)
        };
        let parameter = command.set_all_parameter();

        match dispatch {
            Dispatch::Suppress => {
                debug!("{}: {parameter} unchanged, not sent", device.name);
                return false;
            }
            Dispatch::Send => info!("{}: sending {parameter}", device.name),
            Dispatch::Reassert => info!("{}: re-asserting {parameter}", device.name),
        }

        let sent = tokio::time::timeout(
            self.request_timeout,
            self.gateway.actuate(&device.device_id, &command),
        )
        .await;
        match sent {
            Ok(Ok(())) => {
                device.record_command(command, now_ms);
                command.active_mode() != active_before
            }
            Ok(Err(err)) => {
                warn!("{}: actuation failed: {err}", device.name);
                false
            }
            Err(_) => {
                warn!(
                    "{}: actuation timed out after {:?}",
                    device.name, self.request_timeout
                );
                false
            }
        }
    }

    /// A secondary running a mode other than the primary's is turned off.
    fn arbitrate(&self, id: DeviceId, device: &Device, command: Command) -> Command {
        let zone = self.registry.topology().zone_of(id);
        if zone.is_primary(id) {
            return command;
        }
        let primary_active = self.registry.primary_active_mode(id);
        if zone.permits(id, &command, primary_active) {
            return command;
        }
        info!(
            "{}: yielding to zone {} primary running {}",
            device.name,
            zone.name,
            primary_active.map_or("unknown", |mode| mode.as_str())
        );
        Command {
            power: PowerState::Off,
            ..command
        }
    }

    async fn publish_state(&self, id: DeviceId, device: &Device, force: bool) {
        let topology = self.registry.topology();
        let zone = topology.zone_of(id);
        let state = self.engine.device_state(device, &zone.name);
        let changed = self.registry.slot(id).store_snapshot(&state);
        if !changed && !force {
            return;
        }

        let topic = device_state_topic(&zone.name, &device.name);
        if let Err(err) = self.publish_json(&topic, &state, true).await {
            warn!("{}: state publish failed: {err}", device.name);
        }

        if zone.is_primary(id) {
            let zone_state = ZoneState {
                name: zone.name.clone(),
                primary: device.name.clone(),
                members: zone
                    .devices
                    .iter()
                    .map(|member| topology.device_name(*member).to_string())
                    .collect(),
                state,
            };
            if let Err(err) = self
                .publish_json(&zone_state_topic(&zone.name), &zone_state, true)
                .await
            {
                warn!("zone {}: state publish failed: {err}", zone.name);
            }
        }
    }

    async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        value: &T,
        retain: bool,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(value).map_err(|source| BusError::Encode {
            topic: topic.to_string(),
            source,
        })?;
        self.publisher.publish(topic, payload, retain).await
    }
}

async fn join_all(mut cycles: JoinSet<()>, what: &str) {
    while let Some(joined) = cycles.join_next().await {
        if let Err(err) = joined {
            warn!("{what} cycle panicked: {err}");
        }
    }
}
