//! Control channel between the `procwarden` CLI and a running daemon.
//!
//! Messages are JSON documents framed by a big-endian `u32` length prefix.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{IpcClient, IpcConnection, IpcServer};

#[cfg(not(unix))]
mod unsupported;
#[cfg(not(unix))]
pub use unsupported::{IpcClient, IpcConnection, IpcServer};

use serde::{Deserialize, Serialize};

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcMessage {
    Status,
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Enable { name: String },
    Disable { name: String },
    Protect { name: String },
    Unprotect { name: String },
    StartAll,
    StopAll,
    Pause,
    Restore,
}

impl IpcMessage {
    /// Unit the message targets, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            IpcMessage::Start { name }
            | IpcMessage::Stop { name }
            | IpcMessage::Restart { name }
            | IpcMessage::Enable { name }
            | IpcMessage::Disable { name }
            | IpcMessage::Protect { name }
            | IpcMessage::Unprotect { name } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IpcResponse {
    Success { message: String },
    Error { message: String },
    Data { data: serde_json::Value },
}

impl IpcResponse {
    pub fn success(message: impl Into<String>) -> Self {
        IpcResponse::Success {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, IpcResponse::Error { .. })
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn encode<T: Serialize>(value: &T) -> procwarden_core::Result<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| procwarden_core::Error::Other(anyhow::anyhow!("Failed to encode frame: {}", e)))?;
    if data.len() > MAX_FRAME_LEN as usize {
        return Err(procwarden_core::Error::Other(anyhow::anyhow!(
            "Frame of {} bytes exceeds limit of {}",
            data.len(),
            MAX_FRAME_LEN
        )));
    }
    Ok(data)
}

#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> procwarden_core::Result<T> {
    serde_json::from_slice(data)
        .map_err(|e| procwarden_core::Error::Other(anyhow::anyhow!("Failed to decode frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let data = encode(&IpcMessage::Stop {
            name: "web".to_string(),
        })
        .unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&data).unwrap(),
            json!({"Stop": {"name": "web"}})
        );
        assert_eq!(encode(&IpcMessage::Pause).unwrap(), b"\"Pause\"".to_vec());
    }

    #[test]
    fn test_unit_target() {
        assert_eq!(
            IpcMessage::Protect {
                name: "db".to_string()
            }
            .unit(),
            Some("db")
        );
        assert_eq!(IpcMessage::StartAll.unit(), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<IpcMessage>(b"{\"Launch\":{}}").is_err());
        assert!(decode::<IpcResponse>(b"not json").is_err());
    }

    #[test]
    fn test_response_helpers() {
        assert!(IpcResponse::error("boom").is_error());
        assert_eq!(
            IpcResponse::success("ok"),
            IpcResponse::Success {
                message: "ok".to_string()
            }
        );
    }
}
