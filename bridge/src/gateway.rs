use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use climate_common::{Command, DirectoryEntry, Reading};
use hmac::{Hmac, Mac};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    RequestBuilder,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::GatewayError;

pub const SWITCHBOT_API_URL: &str = "https://api.switch-bot.com/v1.1";
const API_SUCCESS: i64 = 100;
const MAX_ERROR_BODY: usize = 256;

type HmacSha256 = Hmac<Sha256>;

/// The cloud side of the bridge: device directory, sensor reads, actuation.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DirectoryEntry>, GatewayError>;

    async fn read_sensor(&self, temp_device_id: &str) -> Result<Reading, GatewayError>;

    async fn actuate(&self, device_id: &str, command: &Command) -> Result<(), GatewayError>;
}

pub struct SwitchBotGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
    key: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    status_code: i64,
    #[serde(default)]
    message: String,
    body: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceListBody {
    #[serde(default)]
    device_list: Vec<DeviceListEntry>,
    #[serde(default)]
    infrared_remote_list: Vec<DeviceListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceListEntry {
    device_id: String,
    device_name: String,
}

#[derive(Debug, Deserialize)]
struct SensorStatusBody {
    temperature: f32,
    humidity: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest<'a> {
    command_type: &'a str,
    command: &'a str,
    parameter: String,
}

impl SwitchBotGateway {
    pub fn new(token: String, key: String, timeout: Duration) -> Result<Self, GatewayError> {
        Self::with_base_url(SWITCHBOT_API_URL.to_string(), token, key, timeout)
    }

    pub fn with_base_url(
        base_url: String,
        token: String,
        key: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            key,
            timeout,
        })
    }

    fn signed(&self, request: RequestBuilder) -> Result<RequestBuilder, GatewayError> {
        let t = Utc::now().timestamp_millis().to_string();
        let nonce = Uuid::new_v4().to_string();
        let sign = sign(&self.token, &self.key, &t, &nonce)?;
        Ok(request
            .header(AUTHORIZATION, self.token.as_str())
            .header("sign", sign)
            .header("t", t)
            .header("nonce", nonce)
            .header(CONTENT_TYPE, "application/json; charset=utf8"))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, GatewayError> {
        let response = self
            .signed(request)?
            .send()
            .await
            .map_err(|err| self.transport(err))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| self.transport(err))?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }
        decode_envelope(&body)
    }

    fn transport(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Http(err)
        }
    }
}

#[async_trait]
impl Gateway for SwitchBotGateway {
    async fn list_devices(&self) -> Result<Vec<DirectoryEntry>, GatewayError> {
        let request = self.client.get(format!("{}/devices", self.base_url));
        let body: DeviceListBody = self
            .call(request)
            .await?
            .ok_or_else(|| GatewayError::Malformed("device list without body".to_string()))?;
        Ok(directory_entries(body))
    }

    async fn read_sensor(&self, temp_device_id: &str) -> Result<Reading, GatewayError> {
        let request = self
            .client
            .get(format!("{}/devices/{temp_device_id}/status", self.base_url));
        let body: SensorStatusBody = self
            .call(request)
            .await?
            .ok_or_else(|| GatewayError::Malformed("sensor status without body".to_string()))?;
        Ok(Reading {
            temperature: body.temperature,
            humidity: body.humidity,
            observed_at: Utc::now(),
        })
    }

    async fn actuate(&self, device_id: &str, command: &Command) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(&CommandRequest {
            command_type: "command",
            command: "setAll",
            parameter: command.set_all_parameter(),
        })
        .map_err(|err| GatewayError::Malformed(err.to_string()))?;
        let request = self
            .client
            .post(format!("{}/devices/{device_id}/commands", self.base_url))
            .body(payload);
        self.call::<serde_json::Value>(request).await?;
        Ok(())
    }
}

/// `base64(HMAC-SHA256(key, token + t + nonce))`
pub fn sign(token: &str, key: &str, t: &str, nonce: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| GatewayError::Signing)?;
    mac.update(token.as_bytes());
    mac.update(t.as_bytes());
    mac.update(nonce.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn decode_envelope<T: DeserializeOwned>(raw: &str) -> Result<Option<T>, GatewayError> {
    let envelope: Envelope<T> =
        serde_json::from_str(raw).map_err(|err| GatewayError::Malformed(err.to_string()))?;
    if envelope.status_code != API_SUCCESS {
        return Err(GatewayError::Api {
            code: envelope.status_code,
            message: envelope.message,
        });
    }
    Ok(envelope.body)
}

fn directory_entries(body: DeviceListBody) -> Vec<DirectoryEntry> {
    body.infrared_remote_list
        .into_iter()
        .chain(body.device_list)
        .map(|entry| DirectoryEntry {
            device_name: entry.device_name,
            device_id: entry.device_id,
        })
        .collect()
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn signs_token_timestamp_and_nonce() {
        let sign = sign("token", "secret", "1700000000000", "nonce").unwrap();
        assert_eq!(sign, "Ho/pm1Q6hyf9kroxzCu/cSBo7lGKad4tesq6eb2CpUg=");
    }

    #[test]
    fn lists_remotes_before_devices() {
        let raw = r#"{
            "statusCode": 100,
            "message": "success",
            "body": {
                "deviceList": [
                    {
                        "deviceId": "C0FFEE000001",
                        "deviceName": "Meter Living",
                        "deviceType": "Meter"
                    }
                ],
                "infraredRemoteList": [
                    {
                        "deviceId": "02-202301",
                        "deviceName": "Living Room",
                        "remoteType": "Air Conditioner",
                        "hubDeviceId": "C0FFEE000002"
                    }
                ]
            }
        }"#;
        let body: DeviceListBody = decode_envelope(raw).unwrap().unwrap();
        let entries = directory_entries(body);
        assert_eq!(
            entries,
            vec![
                DirectoryEntry {
                    device_name: "Living Room".to_string(),
                    device_id: "02-202301".to_string(),
                },
                DirectoryEntry {
                    device_name: "Meter Living".to_string(),
                    device_id: "C0FFEE000001".to_string(),
                },
            ]
        );
        assert_eq!(entries[0].normalized_name(), "Living_Room");
    }

    #[test]
    fn api_status_other_than_success_is_an_error() {
        let raw = r#"{"statusCode": 161, "message": "device offline", "body": {}}"#;
        let err = decode_envelope::<serde_json::Value>(raw).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Api { code: 161, ref message } if message == "device offline"
        ));
    }

    #[test]
    fn unparseable_response_is_malformed() {
        assert!(matches!(
            decode_envelope::<serde_json::Value>("<html>"),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn decodes_sensor_status() {
        let raw = r#"{
            "statusCode": 100,
            "body": {"temperature": 21.5, "humidity": 47, "battery": 100}
        }"#;
        let body: SensorStatusBody = decode_envelope(raw).unwrap().unwrap();
        assert_eq!(body.temperature, 21.5);
        assert_eq!(body.humidity, 47.0);
    }

    #[test]
    fn command_request_uses_set_all() {
        let payload = serde_json::to_value(CommandRequest {
            command_type: "command",
            command: "setAll",
            parameter: "22,5,1,on".to_string(),
        })
        .unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "commandType": "command",
                "command": "setAll",
                "parameter": "22,5,1,on"
            })
        );
    }

    #[test]
    fn truncates_long_error_bodies() {
        let body = "x".repeat(1_000);
        assert_eq!(truncate(body).len(), MAX_ERROR_BODY);
    }
}
