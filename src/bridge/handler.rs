//! Request handler for DAP client commands
//!
//! Decodes each request into a typed command, applies it to the session and
//! answers with a response. Correlated queries are answered later by the
//! session itself.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::common::{Error, Result};
use crate::dap::{
    AttachArguments, BreakpointLocationsArguments, BreakpointLocationsResponseBody,
    CancelArguments, ContinueResponseBody, EvaluateArguments, InitializeArguments,
    LaunchArguments, RequestMessage, ResponseMessage, ScopesArguments, ScopesResponseBody,
    SetBreakpointsArguments, SetBreakpointsResponseBody, StackTraceArguments,
    ThreadsResponseBody, VariablesArguments,
};

use super::session::{Reply, ResumeKind, Session};

/// Client command with decoded arguments
#[derive(Debug)]
pub enum ClientCommand {
    Initialize(InitializeArguments),
    ConfigurationDone,
    Launch(LaunchArguments),
    Attach(AttachArguments),
    SetBreakpoints(SetBreakpointsArguments),
    BreakpointLocations(BreakpointLocationsArguments),
    Threads,
    StackTrace(StackTraceArguments),
    Scopes(ScopesArguments),
    Variables(VariablesArguments),
    Resume(ResumeKind),
    Evaluate(EvaluateArguments),
    Cancel(CancelArguments),
    Disconnect,
}

impl ClientCommand {
    /// Decode a request's command name and arguments
    pub fn from_request(request: &RequestMessage) -> Result<Self> {
        let command = match request.command.as_str() {
            "initialize" => ClientCommand::Initialize(arguments(request)?),
            "configurationDone" => ClientCommand::ConfigurationDone,
            "launch" => ClientCommand::Launch(arguments(request)?),
            "attach" => ClientCommand::Attach(arguments(request)?),
            "setBreakpoints" => ClientCommand::SetBreakpoints(arguments(request)?),
            "breakpointLocations" => ClientCommand::BreakpointLocations(arguments(request)?),
            "threads" => ClientCommand::Threads,
            "stackTrace" => ClientCommand::StackTrace(arguments(request)?),
            "scopes" => ClientCommand::Scopes(arguments(request)?),
            "variables" => ClientCommand::Variables(arguments(request)?),
            "continue" => ClientCommand::Resume(ResumeKind::Continue),
            "next" => ClientCommand::Resume(ResumeKind::Next),
            "stepIn" => ClientCommand::Resume(ResumeKind::StepIn),
            "stepOut" => ClientCommand::Resume(ResumeKind::StepOut),
            "evaluate" => ClientCommand::Evaluate(arguments(request)?),
            "cancel" => ClientCommand::Cancel(arguments(request)?),
            "disconnect" | "terminate" => ClientCommand::Disconnect,
            other => return Err(Error::UnsupportedCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// Missing arguments decode like an empty object
fn arguments<T: DeserializeOwned>(request: &RequestMessage) -> Result<T> {
    let value = request.arguments.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(value).map_err(|e| Error::invalid_arguments(&request.command, e))
}

/// Handle a DAP request
///
/// Writes the response (unless it is deferred) followed by any events that
/// must come after it.
pub async fn handle_request(session: &mut Session, request: RequestMessage) {
    let seq = request.seq;
    let command = request.command.clone();

    if session.trace() {
        tracing::info!(seq, command = %command, arguments = ?request.arguments, "client >>>");
    } else {
        tracing::debug!(seq, command = %command, "Client request");
    }

    let result = match ClientCommand::from_request(&request) {
        Ok(client_command) => handle_command(session, seq, client_command).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(Reply::Now(body)) => session.respond(ResponseMessage::success(seq, &command, body)),
        Ok(Reply::Deferred) => {}
        Err(e) => {
            tracing::warn!(seq, command = %command, error = %e, "Request failed");
            session.respond(ResponseMessage::failure(seq, &command, &e));
        }
    }

    session.flush_post_response();
}

async fn handle_command(session: &mut Session, seq: i64, command: ClientCommand) -> Result<Reply> {
    match command {
        // === Lifecycle ===
        ClientCommand::Initialize(args) => {
            let capabilities = session.initialize(args)?;
            now(serde_json::to_value(capabilities)?)
        }

        ClientCommand::ConfigurationDone => {
            session.configuration_done()?;
            Ok(Reply::Now(None))
        }

        ClientCommand::Launch(args) => {
            session.launch(args).await?;
            Ok(Reply::Now(None))
        }

        ClientCommand::Attach(args) => {
            session.attach(args).await?;
            Ok(Reply::Now(None))
        }

        ClientCommand::Disconnect => {
            session.disconnect().await?;
            Ok(Reply::Now(None))
        }

        // === Breakpoints ===
        ClientCommand::SetBreakpoints(args) => {
            let path = args
                .source
                .path
                .clone()
                .ok_or_else(|| Error::invalid_arguments("setBreakpoints", "source has no path"))?;
            let breakpoints = session
                .set_breakpoints(&path, &args.requested_lines())
                .await?;
            now(serde_json::to_value(SetBreakpointsResponseBody { breakpoints })?)
        }

        ClientCommand::BreakpointLocations(args) => {
            let breakpoints = session.breakpoint_locations(&args)?;
            now(serde_json::to_value(BreakpointLocationsResponseBody { breakpoints })?)
        }

        // === Inspection ===
        ClientCommand::Threads => {
            let threads = session.threads()?;
            now(serde_json::to_value(ThreadsResponseBody { threads })?)
        }

        ClientCommand::StackTrace(args) => session.stack_trace(seq, args).await,

        ClientCommand::Scopes(args) => {
            let scopes = session.scopes(args.frame_id)?;
            now(serde_json::to_value(ScopesResponseBody { scopes })?)
        }

        ClientCommand::Variables(args) => session.variables(seq, args.variables_reference).await,

        ClientCommand::Evaluate(args) => session.evaluate(seq, args).await,

        // === Execution Control ===
        ClientCommand::Resume(kind) => {
            session.resume(kind).await?;
            if kind == ResumeKind::Continue {
                now(serde_json::to_value(ContinueResponseBody {
                    all_threads_continued: true,
                })?)
            } else {
                Ok(Reply::Now(None))
            }
        }

        ClientCommand::Cancel(args) => {
            session.cancel(args.request_id)?;
            Ok(Reply::Now(None))
        }
    }
}

fn now(body: Value) -> Result<Reply> {
    Ok(Reply::Now(Some(body)))
}
