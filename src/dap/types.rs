//! DAP message types
//!
//! The adapter side of the Debug Adapter Protocol: requests are decoded from
//! the client, responses and events are encoded back.
//! See: https://microsoft.github.io/debug-adapter-protocol/specification

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::common::Error;

// === Base Protocol Messages ===

/// DAP request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// DAP response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ResponseMessage {
    /// Successful response; `seq` is assigned when the message is written
    pub fn success(request_seq: i64, command: &str, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            message_type: "response".to_string(),
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body,
        }
    }

    /// Failed response carrying the error id and text
    pub fn failure(request_seq: i64, command: &str, error: &Error) -> Self {
        Self {
            seq: 0,
            message_type: "response".to_string(),
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(error.short_message()),
            body: Some(json!({
                "error": {
                    "id": error.code(),
                    "format": error.to_string(),
                    "showUser": matches!(
                        error,
                        Error::ProgramNotFound(_)
                            | Error::ConnectionFailed { .. }
                            | Error::RuntimeNotFound(_)
                            | Error::RuntimeSpawnFailed(_)
                    ),
                }
            })),
        }
    }
}

/// DAP event message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

// === Request Arguments ===

/// Initialize request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(rename = "adapterID", default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    #[serde(default = "default_true")]
    pub lines_start_at1: bool,
    #[serde(default = "default_true")]
    pub columns_start_at1: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_format: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for InitializeArguments {
    fn default() -> Self {
        Self {
            client_id: None,
            client_name: None,
            adapter_id: Some("nyx".to_string()),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: Some("path".to_string()),
        }
    }
}

/// Launch request arguments
///
/// Mirrors the `nyx` launch configuration schema of the editor extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    /// Absolute path of the program to debug
    pub program: String,
    /// Stop right after launch
    #[serde(default)]
    pub stop_on_entry: bool,
    /// Log every protocol message at info level
    #[serde(default)]
    pub trace: bool,
    /// Runtime debug port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Attach request arguments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub trace: bool,
}

/// SetBreakpoints request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated DAP field, still sent by some clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<u32>>,
}

impl SetBreakpointsArguments {
    /// Requested lines, preferring `breakpoints` over the legacy `lines`
    pub fn requested_lines(&self) -> Vec<u32> {
        match (&self.breakpoints, &self.lines) {
            (Some(bps), _) => bps.iter().map(|bp| bp.line).collect(),
            (None, Some(lines)) => lines.clone(),
            (None, None) => Vec::new(),
        }
    }
}

/// BreakpointLocations request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocationsArguments {
    pub source: Source,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

/// StackTrace request arguments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    #[serde(default)]
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

/// Scopes request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

/// Variables request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

/// Evaluate request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Cancel request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
}

// === Response Bodies ===

/// Capabilities returned by initialize response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub supports_configuration_done_request: bool,
    #[serde(default)]
    pub supports_evaluate_for_hovers: bool,
    #[serde(default)]
    pub supports_data_breakpoints: bool,
    #[serde(default)]
    pub supports_cancel_request: bool,
    #[serde(default)]
    pub supports_breakpoint_locations_request: bool,
}

/// SetBreakpoints response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBreakpointsResponseBody {
    pub breakpoints: Vec<Breakpoint>,
}

/// BreakpointLocations response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointLocationsResponseBody {
    pub breakpoints: Vec<BreakpointLocation>,
}

/// StackTrace response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

/// Threads response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsResponseBody {
    pub threads: Vec<Thread>,
}

/// Scopes response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopesResponseBody {
    pub scopes: Vec<Scope>,
}

/// Variables response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablesResponseBody {
    pub variables: Vec<Variable>,
}

/// Evaluate response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

/// Continue response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponseBody {
    #[serde(default = "default_true")]
    pub all_threads_continued: bool,
}

// === Common Types ===

/// Source location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Source {
    /// Source for a file path, named after its last component
    pub fn from_path(path: &str) -> Self {
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            name,
            path: Some(path.to_string()),
        }
    }
}

/// Breakpoint to set at a source location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// Breakpoint information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: u32,
    pub verified: bool,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

/// Possible breakpoint position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointLocation {
    pub line: u32,
}

/// Stack frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
}

/// Thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

/// Scope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    #[serde(default)]
    pub expensive: bool,
}

/// Variable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

// === Event Bodies ===

/// Stopped event body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub thread_id: i64,
    #[serde(default)]
    pub all_threads_stopped: bool,
}

/// Output event body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEventBody {
    pub category: String,
    pub output: String,
}

/// Exited event body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i32,
}

// === Outgoing Events ===

/// Event sent to the client
#[derive(Debug, Clone)]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Output(OutputEventBody),
    Exited(ExitedEventBody),
    Terminated,
}

impl Event {
    /// Output event with the given category
    pub fn output(category: &str, output: impl Into<String>) -> Self {
        Event::Output(OutputEventBody {
            category: category.to_string(),
            output: output.into(),
        })
    }

    /// DAP event name
    pub fn name(&self) -> &'static str {
        match self {
            Event::Initialized => "initialized",
            Event::Stopped(_) => "stopped",
            Event::Output(_) => "output",
            Event::Exited(_) => "exited",
            Event::Terminated => "terminated",
        }
    }

    /// Build the wire message; `seq` is assigned when the message is written
    pub fn to_message(&self) -> EventMessage {
        let body = match self {
            Event::Initialized | Event::Terminated => None,
            Event::Stopped(body) => serde_json::to_value(body).ok(),
            Event::Output(body) => serde_json::to_value(body).ok(),
            Event::Exited(body) => serde_json::to_value(body).ok(),
        };

        EventMessage {
            seq: 0,
            message_type: "event".to_string(),
            event: self.name().to_string(),
            body,
        }
    }
}

/// Anything the adapter sends to the client
#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    Response(ResponseMessage),
    Event(Event),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_launch_arguments() {
        let args: LaunchArguments = serde_json::from_value(json!({
            "type": "nyx",
            "request": "launch",
            "program": "/work/main.nx",
            "stopOnEntry": true
        }))
        .unwrap();

        assert_eq!(args.program, "/work/main.nx");
        assert!(args.stop_on_entry);
        assert!(!args.trace);
        assert_eq!(args.port, None);
    }

    #[test]
    fn test_requested_lines_prefers_breakpoints() {
        let args: SetBreakpointsArguments = serde_json::from_value(json!({
            "source": {"path": "/a.nx"},
            "breakpoints": [{"line": 3}, {"line": 8}],
            "lines": [1]
        }))
        .unwrap();
        assert_eq!(args.requested_lines(), vec![3, 8]);

        let legacy: SetBreakpointsArguments = serde_json::from_value(json!({
            "source": {"path": "/a.nx"},
            "lines": [1, 2]
        }))
        .unwrap();
        assert_eq!(legacy.requested_lines(), vec![1, 2]);
    }

    #[test]
    fn test_failure_response_shape() {
        let response = ResponseMessage::failure(4, "launch", &Error::ProgramNotFound("/x.nx".into()));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["type"], "response");
        assert_eq!(value["request_seq"], 4);
        assert_eq!(value["success"], false);
        assert_eq!(value["body"]["error"]["id"], 2001);
        assert_eq!(value["body"]["error"]["showUser"], true);
    }

    #[test]
    fn test_event_messages() {
        let stopped = Event::Stopped(StoppedEventBody {
            reason: "entry".to_string(),
            description: None,
            thread_id: 1,
            all_threads_stopped: true,
        });
        let value = serde_json::to_value(stopped.to_message()).unwrap();
        assert_eq!(value["event"], "stopped");
        assert_eq!(value["body"]["threadId"], 1);
        assert_eq!(value["body"]["reason"], "entry");

        let terminated = serde_json::to_value(Event::Terminated.to_message()).unwrap();
        assert_eq!(terminated["event"], "terminated");
        assert!(terminated.get("body").is_none());
    }
}
