use crate::domain::models::{ConnectOutcome, DisconnectOutcome, ScannedDevice};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum BridgeRequest {
    Devices,
    Connect { address: String },
    Disconnect,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Connected,
    AlreadyConnected,
    Disconnected,
    NotConnected,
    Failed,
}

/// Reply to connect and disconnect requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&ConnectOutcome> for StatusReply {
    fn from(outcome: &ConnectOutcome) -> Self {
        match outcome {
            ConnectOutcome::Connected { device } => Self {
                status: Status::Connected,
                device: Some(device.to_string()),
                detail: None,
            },
            ConnectOutcome::AlreadyConnected { device } => Self {
                status: Status::AlreadyConnected,
                device: Some(device.to_string()),
                detail: None,
            },
            ConnectOutcome::Failed { error } => Self {
                status: Status::Failed,
                device: None,
                detail: Some(error.to_string()),
            },
        }
    }
}

impl From<&DisconnectOutcome> for StatusReply {
    fn from(outcome: &DisconnectOutcome) -> Self {
        let (status, detail) = match outcome {
            DisconnectOutcome::Disconnected => (Status::Disconnected, None),
            DisconnectOutcome::NotConnected => (Status::NotConnected, None),
            DisconnectOutcome::Failed { error } => (Status::Failed, Some(error.to_string())),
        };
        Self {
            status,
            device: None,
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DevicesReply {
    Devices { devices: Vec<ScannedDevice> },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

/// Serialize one message as a protocol line.
pub fn encode_line<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(serde_json::to_string(value)? + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceAddress;
    use crate::error::TransportError;

    #[test]
    fn test_request_wire_format() {
        assert_eq!(
            serde_json::from_str::<BridgeRequest>(r#"{"cmd":"connect","address":"AA:BB"}"#)
                .unwrap(),
            BridgeRequest::Connect {
                address: "AA:BB".to_string()
            }
        );
        assert_eq!(
            serde_json::from_str::<BridgeRequest>(r#"{"cmd":"stream"}"#).unwrap(),
            BridgeRequest::Stream
        );
        assert!(serde_json::from_str::<BridgeRequest>(r#"{"cmd":"reboot"}"#).is_err());
    }

    #[test]
    fn test_connect_replies() {
        let connected = StatusReply::from(&ConnectOutcome::Connected {
            device: DeviceAddress::new("AA:BB"),
        });
        assert_eq!(
            encode_line(&connected).unwrap(),
            "{\"status\":\"connected\",\"device\":\"AA:BB\"}\n"
        );

        let failed = StatusReply::from(&ConnectOutcome::Failed {
            error: TransportError::Timeout("connect"),
        });
        assert_eq!(failed.status, Status::Failed);
        assert_eq!(failed.detail.as_deref(), Some("connect timed out"));
    }

    #[test]
    fn test_disconnect_replies() {
        assert_eq!(
            serde_json::to_string(&StatusReply::from(&DisconnectOutcome::NotConnected)).unwrap(),
            r#"{"status":"not_connected"}"#
        );
    }

    #[test]
    fn test_devices_reply_variants() {
        let list: DevicesReply =
            serde_json::from_str(r#"{"devices":[{"name":"KICKR","address":"AA:BB"}]}"#).unwrap();
        assert_eq!(
            list,
            DevicesReply::Devices {
                devices: vec![ScannedDevice {
                    name: "KICKR".to_string(),
                    address: DeviceAddress::new("AA:BB"),
                }]
            }
        );
        let error: DevicesReply = serde_json::from_str(r#"{"error":"no adapter"}"#).unwrap();
        assert!(matches!(error, DevicesReply::Error { .. }));
    }
}
