use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use climate_common::{
    clamp_topic, sensor_status_topic, Settings, Topology, TOPIC_DEVICE_SET_FILTER,
    TOPIC_HEALTHCHECK, TOPIC_ZONE_SET_FILTER,
};
use rumqttc::{
    AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS, SubscribeFilter,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::BusError;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError>;
}

pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        Ok(())
    }
}

/// A message handed from the event loop to the dispatcher.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub fn mqtt_options(settings: &Settings, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, settings.mqtt_host.clone(), settings.mqtt_port);
    options.set_keep_alive(KEEP_ALIVE);
    if let Some((user, pass)) = credentials(settings) {
        options.set_credentials(user, pass);
    }
    options
}

fn credentials(settings: &Settings) -> Option<(String, String)> {
    let user = settings.mqtt_user.as_deref().filter(|user| !user.is_empty())?;
    Some((user.to_string(), settings.mqtt_pass.clone().unwrap_or_default()))
}

/// Every filter the bridge listens on.
pub fn subscriptions(topology: &Topology) -> Vec<String> {
    let sensors: BTreeSet<&str> = topology.sensor_ids().collect();
    let clamps: BTreeSet<&str> = topology
        .zones()
        .iter()
        .map(|zone| zone.clamp_id.as_str())
        .collect();

    let mut topics = vec![
        TOPIC_DEVICE_SET_FILTER.to_string(),
        TOPIC_ZONE_SET_FILTER.to_string(),
        TOPIC_HEALTHCHECK.to_string(),
    ];
    topics.extend(sensors.into_iter().map(sensor_status_topic));
    topics.extend(clamps.into_iter().map(clamp_topic));
    topics
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: min,
            min,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_MIN, BACKOFF_MAX)
    }
}

/// Queues one subscribe for every topic. Waits for room in the request
/// channel, which may still hold publishes made while the broker was away.
pub fn spawn_resubscribe(client: AsyncClient, topics: Vec<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce));
        match client.subscribe_many(filters).await {
            Ok(()) => debug!("mqtt subscribe queued for {} topics", topics.len()),
            Err(err) => warn!("mqtt subscribe failed: {err}"),
        }
    })
}

/// Drives the connection until `stop` fires, then disconnects and flushes.
/// Subscriptions are (re)issued on every ConnAck.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    inbox: mpsc::Sender<Delivery>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Backoff::default();
        let mut resubscribe: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(message))) => {
                        let delivery = Delivery {
                            topic: message.topic,
                            payload: message.payload.to_vec(),
                        };
                        match inbox.try_send(delivery) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(dropped)) => {
                                warn!("inbox full, dropping message on {}", dropped.topic);
                            }
                            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                                debug!("dispatcher stopped, dropping message on {}", dropped.topic);
                            }
                        }
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        backoff.reset();
                        if let Some(stale) = resubscribe.take() {
                            stale.abort();
                        }
                        resubscribe = Some(spawn_resubscribe(client.clone(), topics.clone()));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let delay = backoff.next_delay();
                        warn!("mqtt poll error: {err}; retrying in {delay:?}");
                        tokio::select! {
                            _ = stop.changed() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }

        if let Some(pending) = resubscribe.take() {
            pending.abort();
        }
        if let Err(err) = client.try_disconnect() {
            warn!("mqtt disconnect failed: {err}");
            return;
        }
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(FLUSH_TIMEOUT, flush).await.is_err() {
            warn!("mqtt disconnect did not flush within {FLUSH_TIMEOUT:?}");
        }
        info!("mqtt disconnected");
    })
}
