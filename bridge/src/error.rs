/// Transient failures talking to the SwitchBot cloud. None of these stop the
/// bridge; the affected device is retried on its next tick.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("http transport error")]
    Http(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("api status {code}: {message}")]
    Api { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("failed to sign request")]
    Signing,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("mqtt client error")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to encode payload for {topic}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn api_error_shows_code_and_message() {
        let err = GatewayError::Api {
            code: 190,
            message: "device internal error".to_string(),
        };
        assert_eq!(err.to_string(), "api status 190: device internal error");
    }

    #[test]
    fn timeout_shows_duration() {
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(5)).to_string(),
            "request timed out after 5s"
        );
    }
}
