//! Runtime message types
//!
//! Inbound messages are a tagged union discriminated by `type`. Events carry
//! a name and an optional body; responses echo the `id` of the command they
//! answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

// === Outbound ===

/// Command sent to the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeCommand {
    /// Correlation id echoed by the runtime's response
    pub id: u64,
    pub command: String,
    pub arguments: Value,
}

impl RuntimeCommand {
    pub fn new(id: u64, command: &str, arguments: Value) -> Self {
        Self {
            id,
            command: command.to_string(),
            arguments,
        }
    }
}

// === Inbound ===

/// Any message received from the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeMessage {
    Event(EventMessage),
    Response(ResponseMessage),
    /// Reserved for runtime-initiated requests; not answered yet
    Request(RequestMessage),
}

impl RuntimeMessage {
    /// Classify a decoded JSON line
    pub fn from_value(value: Value) -> Result<Self> {
        let text = value.to_string();
        serde_json::from_value(value).map_err(|e| Error::ProtocolViolation(format!("{text} ({e})")))
    }
}

/// Runtime event message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Runtime response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: u64,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// Runtime request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

// === Event Bodies ===

/// Stopped event body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedBody {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Output event body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputBody {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Exited event body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedBody {
    #[serde(default)]
    pub exit_code: i32,
}

/// Parsed runtime event
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Stopped(StoppedBody),
    Output(OutputBody),
    Exited(ExitedBody),
    Terminated,
    Unknown { event: String, body: Option<Value> },
}

impl RuntimeEvent {
    /// Parse an event from an EventMessage
    pub fn from_message(msg: &EventMessage) -> Self {
        let unknown = || RuntimeEvent::Unknown {
            event: msg.event.clone(),
            body: msg.body.clone(),
        };
        let body = msg.body.clone().unwrap_or(Value::Null);

        match msg.event.as_str() {
            "stopped" => serde_json::from_value(body)
                .map(RuntimeEvent::Stopped)
                .unwrap_or_else(|_| unknown()),
            "output" => serde_json::from_value(body)
                .map(RuntimeEvent::Output)
                .unwrap_or_else(|_| unknown()),
            "exited" => RuntimeEvent::Exited(
                serde_json::from_value(body).unwrap_or(ExitedBody { exit_code: 0 }),
            ),
            "terminated" => RuntimeEvent::Terminated,
            _ => unknown(),
        }
    }
}

// === Response Bodies ===

/// Frame as reported by the runtime's `stackTrace` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeFrame {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// Body of the runtime's `stackTrace` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceBody {
    #[serde(default)]
    pub stack_frames: Vec<RuntimeFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

/// Variable as reported by the runtime's `variables` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeVariable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

/// Body of the runtime's `variables` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariablesBody {
    #[serde(default)]
    pub variables: Vec<RuntimeVariable>,
}

/// Body of the runtime's `evaluate` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateBody {
    pub result: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_event() {
        let msg = RuntimeMessage::from_value(json!({
            "type": "event",
            "event": "stopped",
            "body": {"reason": "breakpoint", "line": 4}
        }))
        .unwrap();

        let RuntimeMessage::Event(event) = msg else {
            panic!("expected event");
        };
        match RuntimeEvent::from_message(&event) {
            RuntimeEvent::Stopped(body) => {
                assert_eq!(body.reason, "breakpoint");
                assert_eq!(body.line, Some(4));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_classify_response() {
        let msg = RuntimeMessage::from_value(json!({
            "type": "response",
            "id": 12,
            "body": {"result": "3"}
        }))
        .unwrap();

        let RuntimeMessage::Response(response) = msg else {
            panic!("expected response");
        };
        assert_eq!(response.id, 12);
        assert!(response.success);
    }

    #[test]
    fn test_unknown_type_is_a_violation() {
        let err = RuntimeMessage::from_value(json!({"type": "banana"})).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));

        let err = RuntimeMessage::from_value(json!({"a": 1})).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_event_variants() {
        let output = EventMessage {
            event: "output".to_string(),
            body: Some(json!({"output": "hi\n"})),
        };
        assert!(matches!(
            RuntimeEvent::from_message(&output),
            RuntimeEvent::Output(OutputBody { category: None, .. })
        ));

        let exited = EventMessage {
            event: "exited".to_string(),
            body: None,
        };
        assert!(matches!(
            RuntimeEvent::from_message(&exited),
            RuntimeEvent::Exited(ExitedBody { exit_code: 0 })
        ));

        let malformed = EventMessage {
            event: "stopped".to_string(),
            body: Some(json!({"line": 1})),
        };
        assert!(matches!(
            RuntimeEvent::from_message(&malformed),
            RuntimeEvent::Unknown { .. }
        ));
    }
}
