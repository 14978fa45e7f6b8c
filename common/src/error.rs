use thiserror::Error;

/// A text value that is not a member of one of the closed climate enums.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}' (expected one of: {expected})")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Fatal startup errors. Nothing is constructed when one of these is raised.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("climate {climate}: {source}")]
    Enum {
        climate: String,
        #[source]
        source: EnumParseError,
    },
    #[error("device {name} was not found in the SwitchBot device list")]
    UnknownDevice { name: String },
    #[error("zone {zone} references unknown climate {device}")]
    UnknownZoneMember { zone: String, device: String },
    #[error("climate {device} is not assigned to any zone")]
    Unzoned { device: String },
    #[error("climate {device} is assigned to both zone {first} and zone {second}")]
    MultipleZones {
        device: String,
        first: String,
        second: String,
    },
    #[error("zone {zone} has no devices")]
    EmptyZone { zone: String },
    #[error("zone {zone} mixes devices on different clamps")]
    ClampMismatch { zone: String },
    #[error("zone {zone} must have exactly one primary device, found {flagged}")]
    PrimaryElection { zone: String, flagged: usize },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Reasons an inbound bus message is dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    #[error("payload on {topic} is not valid utf-8")]
    NotUtf8 { topic: String },
    #[error("payload on {topic} is too large ({len} bytes)")]
    Oversized { topic: String, len: usize },
    #[error("unrecognized topic {0}")]
    UnknownTopic(String),
    #[error("unrecognized attribute {0}")]
    UnknownAttribute(String),
    #[error("invalid {attribute} payload '{payload}': {reason}")]
    InvalidPayload {
        attribute: &'static str,
        payload: String,
        reason: String,
    },
    #[error("unknown zone {0}")]
    UnknownZone(String),
    #[error("unknown device {0}")]
    UnknownDevice(String),
    #[error("device {device} is not a member of zone {zone}")]
    NotInZone { zone: String, device: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_parse_error_lists_accepted_values() {
        let err = EnumParseError {
            kind: "mode",
            value: "warm".to_string(),
            expected: "off, heat",
        };
        assert_eq!(err.to_string(), "invalid mode 'warm' (expected one of: off, heat)");
    }

    #[test]
    fn primary_election_error_names_zone() {
        let err = ConfigError::PrimaryElection {
            zone: "Office".to_string(),
            flagged: 2,
        };
        assert!(err.to_string().contains("Office"));
    }
}
