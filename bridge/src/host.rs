use std::{
    process::ExitCode,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use climate_common::{resolve, ControlConfig, ControlEngine, Settings};
use rumqttc::AsyncClient;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    bridge::Bridge,
    bus::{self, Delivery, MqttPublisher},
    gateway::{Gateway, SwitchBotGateway},
    heartbeat,
    registry::Registry,
    Cli,
};

const INBOX_CAPACITY: usize = 64;
const MQTT_REQUEST_CAPACITY: usize = 64;

pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok())?;

    if cli.check_heartbeat {
        let answered =
            heartbeat::check(&settings, Duration::from_secs(cli.heartbeat_timeout)).await;
        return Ok(if answered {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let request_timeout = Duration::from_secs(settings.request_timeout_secs);
    let gateway = Arc::new(
        SwitchBotGateway::new(settings.token.clone(), settings.key.clone(), request_timeout)
            .context("failed to build SwitchBot client")?,
    );
    let directory = gateway
        .list_devices()
        .await
        .context("failed to list SwitchBot devices")?;
    let fleet = resolve(&settings, &directory).context("invalid climate configuration")?;
    info!(
        "resolved {} devices in {} zones",
        fleet.topology.len(),
        fleet.topology.zones().len()
    );

    let (client, eventloop) = AsyncClient::new(
        bus::mqtt_options(&settings, &settings.mqtt_client_id),
        MQTT_REQUEST_CAPACITY,
    );
    let topics = bus::subscriptions(&fleet.topology);
    let bridge = Arc::new(Bridge::new(
        Registry::new(fleet),
        ControlEngine::new(ControlConfig::from(&settings)),
        gateway,
        Arc::new(MqttPublisher::new(client.clone())),
        request_timeout,
    ));

    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (bus_stop_tx, bus_stop_rx) = watch::channel(false);

    let bus_task = bus::spawn_event_loop(eventloop, client, topics, inbox_tx, bus_stop_rx);
    let control_task = spawn_control_loop(
        bridge.clone(),
        Duration::from_secs(settings.poll_interval_secs),
        stop_rx.clone(),
    );
    let dispatch_task = spawn_dispatcher(bridge, inbox_rx, stop_rx);

    shutdown_signal().await;
    info!("shutting down");

    // Stop new cycles first; the bus stays up until in-flight cycles have
    // published their state.
    let _ = stop_tx.send(true);
    for (name, task) in [("control loop", control_task), ("dispatcher", dispatch_task)] {
        if let Err(err) = task.await {
            warn!("{name} ended abnormally: {err}");
        }
    }
    let _ = bus_stop_tx.send(true);
    if let Err(err) = bus_task.await {
        warn!("mqtt loop ended abnormally: {err}");
    }

    Ok(ExitCode::SUCCESS)
}

fn apply_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(host) = lookup("MQTT_HOST") {
        settings.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT") {
        settings.mqtt_port = port
            .parse()
            .with_context(|| format!("invalid MQTT_PORT '{port}'"))?;
    }
    if let Some(user) = lookup("MQTT_USER") {
        settings.mqtt_user = Some(user);
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        settings.mqtt_pass = Some(pass);
    }
    if let Some(token) = lookup("SWITCHBOT_TOKEN") {
        settings.token = token;
    }
    if let Some(key) = lookup("SWITCHBOT_KEY") {
        settings.key = key;
    }
    settings
        .validate()
        .context("invalid configuration after environment overrides")
}

fn spawn_control_loop(
    bridge: Arc<Bridge>,
    poll_interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = interval.tick() => bridge.tick(monotonic_ms()).await,
            }
        }
    })
}

/// Handles bus deliveries one at a time. Messages still queued at shutdown
/// are dropped rather than turned into new actuations.
fn spawn_dispatcher(
    bridge: Arc<Bridge>,
    mut inbox: mpsc::Receiver<Delivery>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                delivery = inbox.recv() => match delivery {
                    Some(delivery) => {
                        bridge
                            .handle_message(&delivery.topic, &delivery.payload, monotonic_ms())
                            .await;
                    }
                    None => break,
                },
            }
        }
        inbox.close();
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const CONFIG: &str = r#"
mqtt_host: localhost
token: file-token
key: file-key
climates:
  Den:
    temperature: 20
    humidity: 40
    mode: heat
    fan_mode: auto
    preset_mode: none
    temp_device_id: 0123456789ab
    clamp: den/current
zones:
  Downstairs: [Den]
"#;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut settings = Settings::from_yaml(CONFIG).unwrap();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("MQTT_HOST", "broker.lan"),
                ("MQTT_PORT", "8883"),
                ("MQTT_USER", "bridge"),
                ("SWITCHBOT_TOKEN", "env-token"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.mqtt_host, "broker.lan");
        assert_eq!(settings.mqtt_port, 8883);
        assert_eq!(settings.mqtt_user.as_deref(), Some("bridge"));
        assert_eq!(settings.mqtt_pass, None);
        assert_eq!(settings.token, "env-token");
        assert_eq!(settings.key, "file-key");
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut settings = Settings::from_yaml(CONFIG).unwrap();
        assert!(apply_overrides(&mut settings, lookup(&[("MQTT_PORT", "http")])).is_err());

        let mut settings = Settings::from_yaml(CONFIG).unwrap();
        assert!(apply_overrides(&mut settings, lookup(&[("SWITCHBOT_KEY", " ")])).is_err());
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let first = monotonic_ms();
        let second = monotonic_ms();
        assert!(second >= first);
    }
}
