//! Wire models of the HTTP and websocket API.

use serde::{Deserialize, Serialize};

/// JSON body of every failed HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorModel {
    pub error: String,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Operation sent by a websocket client.
///
/// `op` is kept raw so an unknown code can still be answered with the
/// operation's nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op: u8,
    #[serde(default)]
    pub nonce: i64,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Ping = 0,
    Exec = 1,
    Kill = 2,
}

impl TryFrom<u8> for OpCode {
    type Error = WsError;

    fn try_from(value: u8) -> Result<Self, WsError> {
        match value {
            0 => Ok(OpCode::Ping),
            1 => Ok(OpCode::Exec),
            2 => Ok(OpCode::Kill),
            _ => Err(WsError::invalid_op_code()),
        }
    }
}

/// Event sent to a websocket client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub code: EventCode,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub nonce: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventCode {
    Pong = 0,
    Error = 1,
    Spawn = 2,
    Log = 3,
    Stop = 4,
}

impl From<EventCode> for u8 {
    fn from(code: EventCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for EventCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(EventCode::Pong),
            1 => Ok(EventCode::Error),
            2 => Ok(EventCode::Spawn),
            3 => Ok(EventCode::Log),
            4 => Ok(EventCode::Stop),
            other => Err(format!("unknown event code {}", other)),
        }
    }
}

impl Event {
    pub fn new(code: EventCode, nonce: i64, data: impl Serialize) -> Self {
        Self {
            code,
            nonce,
            data: serde_json::to_value(data).ok(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRunId {
    #[serde(rename = "runid")]
    pub run_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataLog {
    #[serde(rename = "runid")]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStop {
    #[serde(rename = "runid")]
    pub run_id: String,
    #[serde(rename = "exectimems")]
    pub exec_time_ms: u64,
}

/// Error payload of an [`EventCode::Error`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct WsError {
    pub code: u16,
    pub message: String,
}

impl WsError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_message_type() -> Self {
        Self::new(400, "invalid message type")
    }

    pub fn invalid_op_code() -> Self {
        Self::new(400, "invalid operation code")
    }

    pub fn empty_code() -> Self {
        Self::new(400, "code is empty")
    }

    pub fn sandbox_not_running() -> Self {
        Self::new(400, "sandbox is not running")
    }
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = Event::new(
            EventCode::Log,
            7,
            DataLog {
                run_id: "abc".to_string(),
                stdout: "hi\n".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"code": 3, "nonce": 7, "data": {"runid": "abc", "stdout": "hi\n"}})
        );

        let pong = Event::new(EventCode::Pong, 0, "Pong!");
        assert_eq!(
            serde_json::to_value(&pong).unwrap(),
            json!({"code": 0, "data": "Pong!"})
        );
    }

    #[test]
    fn test_operation_parsing() {
        let op: Operation = serde_json::from_str(
            r#"{"op": 1, "nonce": 3, "args": {"language": "python3", "code": "print(1)"}}"#,
        )
        .unwrap();
        assert_eq!(OpCode::try_from(op.op).unwrap(), OpCode::Exec);
        assert_eq!(op.nonce, 3);

        let op: Operation = serde_json::from_str(r#"{"op": 9, "nonce": 4}"#).unwrap();
        assert_eq!(OpCode::try_from(op.op), Err(WsError::invalid_op_code()));
    }
}
