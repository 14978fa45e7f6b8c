use std::time::Duration;

use async_trait::async_trait;
use climate_common::{Settings, HEALTHCHECK_REQUEST, HEALTHCHECK_RESPONSE, TOPIC_HEALTHCHECK};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, QoS};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::mqtt_options;

/// Publishes `CHECK` on the healthcheck topic and waits for a running bridge
/// to answer `OK`. Returns false on timeout or connection failure.
pub async fn check(settings: &Settings, timeout: Duration) -> bool {
    let client_id = format!("{}-heartbeat-{}", settings.mqtt_client_id, Uuid::new_v4().simple());
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(settings, &client_id), 10);

    let outcome = tokio::time::timeout(timeout, round_trip(&client, &mut eventloop)).await;
    let answered = match outcome {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!("heartbeat failed: {err:#}");
            false
        }
        Err(_) => {
            warn!("no heartbeat response within {timeout:?}");
            false
        }
    };

    if let Err(err) = client.try_disconnect() {
        debug!("heartbeat disconnect failed: {err}");
    }
    answered
}

#[async_trait]
trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Event, ConnectionError>;
}

#[async_trait]
impl EventSource for EventLoop {
    async fn next_event(&mut self) -> Result<Event, ConnectionError> {
        self.poll().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Subscribe,
    SendCheck,
    Answered,
    Wait,
}

fn next_step(event: &Event) -> Step {
    match event {
        Event::Incoming(Incoming::ConnAck(_)) => Step::Subscribe,
        Event::Incoming(Incoming::SubAck(_)) => Step::SendCheck,
        Event::Incoming(Incoming::Publish(message))
            if is_reply(&message.topic, &message.payload) =>
        {
            Step::Answered
        }
        _ => Step::Wait,
    }
}

async fn round_trip(client: &AsyncClient, events: &mut impl EventSource) -> anyhow::Result<()> {
    loop {
        let event = events.next_event().await?;
        match next_step(&event) {
            Step::Subscribe => client.try_subscribe(TOPIC_HEALTHCHECK, QoS::AtLeastOnce)?,
            Step::SendCheck => {
                debug!("heartbeat subscribed, sending {HEALTHCHECK_REQUEST}");
                client.try_publish(
                    TOPIC_HEALTHCHECK,
                    QoS::AtLeastOnce,
                    false,
                    HEALTHCHECK_REQUEST,
                )?;
            }
            Step::Answered => return Ok(()),
            Step::Wait => {}
        }
    }
}

fn is_reply(topic: &str, payload: &[u8]) -> bool {
    topic == TOPIC_HEALTHCHECK && payload.trim_ascii() == HEALTHCHECK_RESPONSE.as_bytes()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, Request, SubAck, SubscribeReasonCode};

    use super::*;

    const DEN: &str = r#"
mqtt_host: 127.0.0.1
mqtt_port: 9
token: t
key: k
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

    #[async_trait]
    impl EventSource for VecDeque<Event> {
        async fn next_event(&mut self) -> Result<Event, ConnectionError> {
            self.pop_front().ok_or(ConnectionError::RequestsDone)
        }
    }

    fn connected() -> Event {
        Event::Incoming(Incoming::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)))
    }

    fn subscribed() -> Event {
        Event::Incoming(Incoming::SubAck(SubAck::new(
            1,
            vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        )))
    }

    fn message(payload: &str) -> Event {
        Event::Incoming(Incoming::Publish(Publish::new(
            TOPIC_HEALTHCHECK,
            QoS::AtLeastOnce,
            payload,
        )))
    }

    /// Everything the client queued, in order.
    fn requests(eventloop: &mut EventLoop) -> Vec<String> {
        eventloop.clean();
        eventloop
            .pending
            .iter()
            .map(|request| match request {
                Request::Subscribe(subscribe) => format!("subscribe {}", subscribe.filters[0].path),
                Request::Publish(publish) => format!(
                    "publish {} {}",
                    publish.topic,
                    String::from_utf8_lossy(&publish.payload)
                ),
                other => format!("{other:?}"),
            })
            .collect()
    }

    fn client() -> (AsyncClient, EventLoop) {
        let settings = Settings::from_yaml(DEN).unwrap();
        AsyncClient::new(mqtt_options(&settings, "heartbeat-test"), 10)
    }

    #[test]
    fn only_ok_on_healthcheck_topic_is_a_reply() {
        assert!(is_reply(TOPIC_HEALTHCHECK, b"OK"));
        assert!(is_reply(TOPIC_HEALTHCHECK, b"OK\n"));
        assert!(!is_reply(TOPIC_HEALTHCHECK, b"CHECK"));
        assert!(!is_reply("switchbot_climate/Home/state", b"OK"));
    }

    #[test]
    fn steps_follow_the_connection() {
        assert_eq!(next_step(&connected()), Step::Subscribe);
        assert_eq!(next_step(&subscribed()), Step::SendCheck);
        assert_eq!(next_step(&message("CHECK")), Step::Wait);
        assert_eq!(next_step(&message("OK")), Step::Answered);
    }

    #[tokio::test]
    async fn answered_check_completes_round_trip() {
        let (client, mut eventloop) = client();
        let mut events = VecDeque::from([
            connected(),
            subscribed(),
            // our own request echoed back by the broker
            message("CHECK"),
            message("OK"),
        ]);

        round_trip(&client, &mut events).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(
            requests(&mut eventloop),
            vec![
                "subscribe switchbot_climate/healthcheck/status".to_string(),
                "publish switchbot_climate/healthcheck/status CHECK".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unanswered_check_fails_round_trip() {
        let (client, _eventloop) = client();
        let mut events = VecDeque::from([connected(), subscribed(), message("CHECK")]);
        assert!(round_trip(&client, &mut events).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_broker_fails_the_check() {
        let settings = Settings::from_yaml(DEN).unwrap();
        assert!(!check(&settings, Duration::from_millis(300)).await);
    }
}
