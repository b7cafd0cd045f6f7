//! Debug session state machine
//!
//! Owns one debug session from `initialize` to termination: the runtime
//! process and socket, request correlation, variable handles and
//! breakpoints. All mutation happens through `&mut self` from a single
//! actor task, so runtime events and client commands are applied one at a
//! time in arrival order.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::common::{config::Config, Error, Result};
use crate::dap::{
    AttachArguments, Breakpoint, BreakpointLocation, BreakpointLocationsArguments, Capabilities,
    EvaluateArguments, EvaluateResponseBody, Event, ExitedEventBody, InitializeArguments,
    LaunchArguments, OutgoingMessage, ResponseMessage, Scope, Source, StackFrame,
    StackTraceArguments, StackTraceResponseBody, StoppedEventBody, Thread, Variable,
    VariablesResponseBody,
};
use crate::runtime::protocol::{
    EvaluateBody, ResponseMessage as RuntimeResponse, StackTraceBody, VariablesBody,
};
use crate::runtime::{
    connector, supervisor, RetryPolicy, RuntimeCommand, RuntimeEvent, RuntimeInput,
    RuntimeMessage, RuntimeProcess, RuntimeTransport,
};

use super::breakpoints::BreakpointRegistry;
use super::handles::{ScopeKind, VariableHandles};
use super::pending::{PendingRequest, PendingRequests, Query, ReplyTarget};

/// The Nyx runtime is single-threaded; every thread id refers to this one
pub const THREAD_ID: i64 = 1;

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `initialize`
    Uninitialized,
    /// Capabilities exchanged, no runtime yet
    Initialized,
    /// Program is running
    Running,
    /// A resume/step command was sent and not confirmed yet
    Stepping,
    /// Program is paused (entry, breakpoint, step)
    Stopped,
    /// Session is over; absorbing
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Stepping => write!(f, "stepping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Execution control commands forwarded to the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeKind {
    Continue,
    Next,
    StepIn,
    StepOut,
}

impl ResumeKind {
    pub fn command(self) -> &'static str {
        match self {
            ResumeKind::Continue => "continue",
            ResumeKind::Next => "next",
            ResumeKind::StepIn => "stepIn",
            ResumeKind::StepOut => "stepOut",
        }
    }
}

/// How a client request gets answered
#[derive(Debug)]
pub enum Reply {
    /// Respond right away with this body
    Now(Option<Value>),
    /// The runtime's response will produce the client response later
    Deferred,
}

/// When the client hears about the end of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notify {
    Never,
    /// Runtime-driven endings, outside any request
    Now,
    /// After the response to the request being handled
    AfterResponse,
}

/// A debug session bridging one client and one runtime
pub struct Session {
    config: Config,
    state: SessionState,
    /// Line numbering negotiated at initialize; lines are passed through as-is
    lines_start_at1: bool,
    /// Log protocol traffic at info level
    trace: bool,
    /// Connected runtime socket
    transport: Option<RuntimeTransport>,
    /// Spawned runtime, `None` when attached
    process: Option<RuntimeProcess>,
    /// Inbox for runtime-side tasks
    runtime_tx: mpsc::UnboundedSender<RuntimeInput>,
    /// Receiver side, handed to the actor loop
    runtime_rx: Option<mpsc::UnboundedReceiver<RuntimeInput>>,
    /// Responses and events for the client
    outgoing: mpsc::UnboundedSender<OutgoingMessage>,
    /// Events that must follow the response currently being built
    post_response: Vec<Event>,
    next_runtime_id: u64,
    pending: PendingRequests,
    handles: VariableHandles,
    breakpoints: BreakpointRegistry,
    terminated_sent: bool,
    request_timeout: Duration,
}

impl Session {
    pub fn new(config: Config, outgoing: mpsc::UnboundedSender<OutgoingMessage>) -> Self {
        let (runtime_tx, runtime_rx) = mpsc::unbounded_channel();
        let request_timeout = config.timeouts.runtime_request();

        Self {
            config,
            state: SessionState::Uninitialized,
            lines_start_at1: true,
            trace: false,
            transport: None,
            process: None,
            runtime_tx,
            runtime_rx: Some(runtime_rx),
            outgoing,
            post_response: Vec::new(),
            next_runtime_id: 1,
            pending: PendingRequests::new(),
            handles: VariableHandles::new(),
            breakpoints: BreakpointRegistry::new(),
            terminated_sent: false,
            request_timeout,
        }
    }

    /// Take the runtime inbox receiver (can only be called once)
    pub fn take_runtime_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<RuntimeInput>> {
        self.runtime_rx.take()
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn lines_start_at1(&self) -> bool {
        self.lines_start_at1
    }

    pub fn trace(&self) -> bool {
        self.trace
    }

    /// Number of runtime commands still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Breakpoints registered for a source path
    pub fn breakpoints_for(&self, path: &str) -> &[Breakpoint] {
        self.breakpoints.for_path(path)
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    // === Client output ===

    /// Send an event to the client
    pub fn emit(&self, event: Event) {
        tracing::trace!(event = event.name(), "Emitting event");
        let _ = self.outgoing.send(OutgoingMessage::Event(event));
    }

    /// Send a response to the client
    pub fn respond(&self, response: ResponseMessage) {
        let _ = self.outgoing.send(OutgoingMessage::Response(response));
    }

    /// Emit the events that were waiting for the current response
    pub fn flush_post_response(&mut self) {
        for event in std::mem::take(&mut self.post_response) {
            self.emit(event);
        }
    }

    // === Lifecycle ===

    /// Negotiate capabilities
    pub fn initialize(&mut self, args: InitializeArguments) -> Result<Capabilities> {
        self.ensure_open()?;
        if self.state != SessionState::Uninitialized {
            return Err(Error::invalid_state("initialize", &self.state.to_string()));
        }

        tracing::info!(
            client = args.client_name.as_deref().unwrap_or("unknown"),
            lines_start_at1 = args.lines_start_at1,
            "Initializing session"
        );

        self.lines_start_at1 = args.lines_start_at1;
        self.state = SessionState::Initialized;
        // Breakpoints may be configured before the runtime exists
        self.post_response.push(Event::Initialized);

        Ok(Capabilities {
            supports_configuration_done_request: true,
            supports_evaluate_for_hovers: true,
            supports_data_breakpoints: false,
            supports_cancel_request: true,
            supports_breakpoint_locations_request: true,
        })
    }

    /// End of the client's configuration sequence
    pub fn configuration_done(&mut self) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(state = %self.state, "Configuration done");
        Ok(())
    }

    /// Spawn the runtime on a program and connect to it
    #[tracing::instrument(skip(self, args), fields(program = %args.program))]
    pub async fn launch(&mut self, args: LaunchArguments) -> Result<()> {
        self.ensure_open()?;
        if self.state != SessionState::Initialized {
            return Err(Error::invalid_state("launch", &self.state.to_string()));
        }

        self.trace = args.trace;
        let program = PathBuf::from(&args.program);
        let port = args.port.unwrap_or(self.config.runtime.default_port);

        if let Err(e) = self.start_runtime(&program, port).await {
            tracing::error!(error = %e, "Launch failed");
            self.shutdown(Notify::Never).await;
            return Err(e);
        }

        self.state = SessionState::Running;
        if args.stop_on_entry {
            self.state = SessionState::Stopped;
            self.post_response.push(stopped_event("entry", None));
        }

        tracing::info!(port, stop_on_entry = args.stop_on_entry, "Launched");
        Ok(())
    }

    /// Connect to an already running runtime
    #[tracing::instrument(skip(self, args))]
    pub async fn attach(&mut self, args: AttachArguments) -> Result<()> {
        self.ensure_open()?;
        if self.state != SessionState::Initialized {
            return Err(Error::invalid_state("attach", &self.state.to_string()));
        }

        self.trace = args.trace;
        let port = args.port.unwrap_or(self.config.runtime.default_port);

        if let Err(e) = self.connect(port).await {
            tracing::error!(error = %e, "Attach failed");
            self.shutdown(Notify::Never).await;
            return Err(e);
        }

        self.state = SessionState::Running;
        tracing::info!(port, "Attached");
        Ok(())
    }

    /// Kill the runtime, drop the connection and end the session
    ///
    /// Always succeeds and may be called any number of times. The
    /// `terminated` event waits in the post-response queue, so it follows
    /// the disconnect response.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state != SessionState::Terminated {
            tracing::info!(state = %self.state, "Disconnecting");
        }
        self.shutdown(Notify::AfterResponse).await;
        Ok(())
    }

    async fn start_runtime(&mut self, program: &Path, port: u16) -> Result<()> {
        let process =
            supervisor::launch(&self.config, program, port, self.runtime_tx.clone()).await?;
        tracing::debug!(pid = ?process.pid(), "Runtime spawned");
        self.process = Some(process);
        self.connect(port).await
    }

    async fn connect(&mut self, port: u16) -> Result<()> {
        let policy = RetryPolicy::from(&self.config.connect);
        let host = self.config.runtime.host.clone();
        let stream = connector::connect(&host, port, &policy).await?;

        let transport = RuntimeTransport::start(stream, self.runtime_tx.clone());
        self.adopt_transport(transport).await
    }

    /// Take over a runtime connection and replay the breakpoints set before
    /// it existed
    ///
    /// A failed write fails the startup request. Teardown is left to the
    /// caller, which does it without notifying the client.
    async fn adopt_transport(&mut self, transport: RuntimeTransport) -> Result<()> {
        self.transport = Some(transport);

        for (path, lines) in self.breakpoints.line_sets() {
            let id = self
                .send_command("setBreakpoints", json!({ "path": &path, "lines": lines }))
                .await?;
            let target = ReplyTarget::Breakpoints { path };
            self.pending
                .insert(PendingRequest::new(id, "setBreakpoints", target))?;
        }
        Ok(())
    }

    /// Tear everything down and enter `Terminated`
    ///
    /// The client gets at most one `terminated` event per session, delivered
    /// as `notify` says. Startup failures use [`Notify::Never`]: the failed
    /// request is all the client needs to see.
    async fn shutdown(&mut self, notify: Notify) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }

        for pending in self.pending.drain() {
            if let ReplyTarget::Client {
                request_seq,
                command,
                ..
            } = pending.target
            {
                self.respond(ResponseMessage::failure(
                    request_seq,
                    &command,
                    &Error::SessionClosed,
                ));
            }
        }

        self.handles.clear();
        self.post_response.clear();
        self.state = SessionState::Terminated;

        if !self.terminated_sent {
            self.terminated_sent = true;
            match notify {
                Notify::Never => {}
                Notify::Now => self.emit(Event::Terminated),
                Notify::AfterResponse => self.post_response.push(Event::Terminated),
            }
        }
    }

    // === Breakpoints ===

    /// Replace the breakpoints of a source file
    pub async fn set_breakpoints(&mut self, path: &str, lines: &[u32]) -> Result<Vec<Breakpoint>> {
        self.ensure_open()?;

        let breakpoints = self.breakpoints.set_breakpoints(path, lines);
        tracing::debug!(path, ?lines, "Breakpoints replaced");

        if self.transport.is_some() {
            self.forward_breakpoints(path, lines).await?;
        }
        Ok(breakpoints)
    }

    async fn forward_breakpoints(&mut self, path: &str, lines: &[u32]) -> Result<()> {
        let target = ReplyTarget::Breakpoints {
            path: path.to_string(),
        };
        self.forward("setBreakpoints", json!({ "path": path, "lines": lines }), target)
            .await
            .map(|_| ())
    }

    /// Candidate breakpoint lines; every line of the range is allowed
    pub fn breakpoint_locations(
        &self,
        args: &BreakpointLocationsArguments,
    ) -> Result<Vec<BreakpointLocation>> {
        self.ensure_open()?;
        let end = args.end_line.unwrap_or(args.line).max(args.line);
        Ok((args.line..=end)
            .map(|line| BreakpointLocation { line })
            .collect())
    }

    // === Inspection ===

    /// The runtime's single thread
    pub fn threads(&self) -> Result<Vec<Thread>> {
        self.ensure_debuggee("list threads")?;
        Ok(vec![Thread {
            id: THREAD_ID,
            name: "thread 1".to_string(),
        }])
    }

    /// Ask the runtime for the current stack
    pub async fn stack_trace(&mut self, request_seq: i64, args: StackTraceArguments) -> Result<Reply> {
        self.ensure_debuggee("get stack trace")?;

        let mut arguments = json!({ "startFrame": args.start_frame.unwrap_or(0) });
        if let Some(levels) = args.levels.filter(|&l| l > 0) {
            arguments["levels"] = json!(levels);
        }

        self.forward(
            "stackTrace",
            arguments,
            ReplyTarget::Client {
                request_seq,
                command: "stackTrace".to_string(),
                query: Query::StackTrace,
            },
        )
        .await?;
        Ok(Reply::Deferred)
    }

    /// Local and global scopes of a frame
    ///
    /// Handles are stable: asking again for the same frame returns the same
    /// references.
    pub fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
        self.ensure_open()?;

        let local = self
            .handles
            .get_or_create(&ScopeKind::Local.descriptor(frame_id));
        let global = self
            .handles
            .get_or_create(&ScopeKind::Global.descriptor(frame_id));

        Ok(vec![
            Scope {
                name: "Local".to_string(),
                variables_reference: local,
                expensive: false,
            },
            Scope {
                name: "Global".to_string(),
                variables_reference: global,
                expensive: true,
            },
        ])
    }

    /// Contents of a scope handle
    ///
    /// Unknown or stale references produce an empty list rather than an error.
    pub async fn variables(&mut self, request_seq: i64, reference: i64) -> Result<Reply> {
        self.ensure_open()?;

        let scope = self.handles.get(reference).and_then(ScopeKind::parse);
        let Some((kind, frame_id)) = scope else {
            tracing::debug!(reference, "Unknown variables reference");
            return Ok(Reply::Now(Some(empty_variables())));
        };
        if self.transport.is_none() {
            return Ok(Reply::Now(Some(empty_variables())));
        }

        let scope_name = match kind {
            ScopeKind::Local => "local",
            ScopeKind::Global => "global",
        };
        self.forward(
            "variables",
            json!({ "scope": scope_name, "frameId": frame_id }),
            ReplyTarget::Client {
                request_seq,
                command: "variables".to_string(),
                query: Query::Variables,
            },
        )
        .await?;
        Ok(Reply::Deferred)
    }

    /// Evaluate an expression in the runtime
    pub async fn evaluate(&mut self, request_seq: i64, args: EvaluateArguments) -> Result<Reply> {
        self.ensure_debuggee("evaluate")?;

        let mut arguments = json!({ "expression": args.expression });
        if let Some(frame_id) = args.frame_id {
            arguments["frameId"] = json!(frame_id);
        }
        if let Some(context) = args.context {
            arguments["context"] = json!(context);
        }

        self.forward(
            "evaluate",
            arguments,
            ReplyTarget::Client {
                request_seq,
                command: "evaluate".to_string(),
                query: Query::Evaluate,
            },
        )
        .await?;
        Ok(Reply::Deferred)
    }

    // === Execution Control ===

    /// Forward continue/next/stepIn/stepOut
    ///
    /// The session stays in `Stepping` until the runtime confirms the command
    /// or reports a stop.
    pub async fn resume(&mut self, kind: ResumeKind) -> Result<()> {
        self.ensure_debuggee(kind.command())?;

        self.forward(kind.command(), json!({}), ReplyTarget::Resume)
            .await?;
        self.state = SessionState::Stepping;
        Ok(())
    }

    /// Drop a pending client query and answer it as cancelled
    pub fn cancel(&mut self, request_id: Option<i64>) -> Result<()> {
        self.ensure_open()?;

        let Some(request_id) = request_id else {
            return Ok(());
        };
        if let Some(pending) = self.pending.take_by_client_seq(request_id) {
            tracing::debug!(request_id, command = %pending.command, "Cancelled pending request");
            if let ReplyTarget::Client {
                request_seq,
                command,
                ..
            } = pending.target
            {
                self.respond(ResponseMessage::failure(request_seq, &command, &Error::Cancelled));
            }
        }
        Ok(())
    }

    // === Runtime input ===

    /// Apply one notification from the runtime side
    pub async fn handle_runtime_input(&mut self, input: RuntimeInput) {
        if self.state == SessionState::Terminated {
            tracing::trace!(?input, "Discarding runtime input after termination");
            return;
        }

        match input {
            RuntimeInput::Message(message) => self.handle_runtime_message(message).await,
            RuntimeInput::ProtocolViolation(line) => {
                tracing::warn!(line = %line, "Invalid message from runtime");
                self.emit(Event::output(
                    "stderr",
                    format!("Invalid protocol message: {line}\n"),
                ));
            }
            RuntimeInput::SocketError(message) => {
                self.emit(Event::output("stderr", format!("Socket error: {message}\n")));
            }
            RuntimeInput::SocketClosed => {
                tracing::info!("Runtime connection closed");
                self.shutdown(Notify::Now).await;
            }
            RuntimeInput::ProcessOutput { category, text } => {
                self.emit(Event::output(category, text));
            }
            RuntimeInput::ProcessExited { code } => {
                tracing::info!(?code, "Runtime process exited");
                if let Some(exit_code) = code {
                    self.emit(Event::Exited(ExitedEventBody { exit_code }));
                }
                self.shutdown(Notify::Now).await;
            }
        }
    }

    async fn handle_runtime_message(&mut self, message: RuntimeMessage) {
        match message {
            RuntimeMessage::Event(event) => match RuntimeEvent::from_message(&event) {
                RuntimeEvent::Stopped(body) => {
                    tracing::debug!(reason = %body.reason, line = ?body.line, "Runtime stopped");
                    self.state = SessionState::Stopped;
                    self.emit(stopped_event(&body.reason, body.description));
                }
                RuntimeEvent::Output(body) => {
                    let category = body.category.as_deref().unwrap_or("console");
                    self.emit(Event::output(category, body.output));
                }
                RuntimeEvent::Exited(body) => {
                    self.emit(Event::Exited(ExitedEventBody {
                        exit_code: body.exit_code,
                    }));
                }
                RuntimeEvent::Terminated => {
                    self.shutdown(Notify::Now).await;
                }
                RuntimeEvent::Unknown { event, body } => {
                    tracing::warn!(event = %event, ?body, "Unhandled runtime event");
                    self.emit(Event::output(
                        "stderr",
                        format!("Unhandled runtime event '{event}'\n"),
                    ));
                }
            },
            RuntimeMessage::Response(response) => self.handle_runtime_response(response),
            RuntimeMessage::Request(request) => {
                tracing::warn!(command = %request.command, "Runtime sent a request, not supported");
                self.emit(Event::output(
                    "stderr",
                    format!("Unsupported runtime request '{}'\n", request.command),
                ));
            }
        }
    }

    fn handle_runtime_response(&mut self, response: RuntimeResponse) {
        let Some(pending) = self.pending.take(response.id) else {
            tracing::warn!(id = response.id, "Response for unknown or expired request");
            return;
        };

        let elapsed = pending.issued_at.elapsed();
        tracing::debug!(id = pending.id, command = %pending.command, ?elapsed, success = response.success, "Runtime response");

        let failure = (!response.success).then(|| {
            response
                .message
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string())
        });

        match pending.target {
            ReplyTarget::Client {
                request_seq,
                command,
                query,
            } => {
                let result = match failure {
                    Some(message) => Err(Error::runtime_request_failed(&pending.command, &message)),
                    None => client_body(&query, response.body.unwrap_or(Value::Null)),
                };
                match result {
                    Ok(body) => self.respond(ResponseMessage::success(request_seq, &command, Some(body))),
                    Err(e) => self.respond(ResponseMessage::failure(request_seq, &command, &e)),
                }
            }
            ReplyTarget::Resume => match failure {
                Some(message) => {
                    self.emit(Event::output(
                        "stderr",
                        format!("Runtime rejected '{}': {}\n", pending.command, message),
                    ));
                    if self.state == SessionState::Stepping {
                        self.state = SessionState::Stopped;
                    }
                }
                None => {
                    if self.state == SessionState::Stepping {
                        self.state = SessionState::Running;
                    }
                }
            },
            ReplyTarget::Breakpoints { path } => {
                if let Some(message) = failure {
                    self.emit(Event::output(
                        "stderr",
                        format!("Runtime rejected breakpoints for {path}: {message}\n"),
                    ));
                }
            }
        }
    }

    /// Give up on runtime commands that outlived the request timeout
    pub fn expire_pending(&mut self, now: Instant) {
        for pending in self.pending.take_expired(now, self.request_timeout) {
            tracing::warn!(id = pending.id, command = %pending.command, "Runtime request timed out");
            match pending.target {
                ReplyTarget::Client {
                    request_seq,
                    command,
                    ..
                } => {
                    let error = Error::RuntimeUnresponsive {
                        command: pending.command.clone(),
                        timeout_secs: self.request_timeout.as_secs(),
                    };
                    self.respond(ResponseMessage::failure(request_seq, &command, &error));
                }
                // Without confirmation assume the runtime did resume
                ReplyTarget::Resume => {
                    if self.state == SessionState::Stepping {
                        self.state = SessionState::Running;
                    }
                }
                ReplyTarget::Breakpoints { .. } => {}
            }
        }
    }

    // === Helpers ===

    /// Send a correlated command to the runtime while serving a request
    ///
    /// A write failure is a mid-session socket failure: it is reported as
    /// output and ends the session, with `terminated` after the response.
    async fn forward(&mut self, command: &str, arguments: Value, target: ReplyTarget) -> Result<u64> {
        if self.transport.is_none() {
            return Err(Error::invalid_state(command, "not connected to the runtime"));
        }

        let id = match self.send_command(command, arguments).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(command, error = %e, "Failed to write to runtime");
                self.emit(Event::output("stderr", format!("{e}\n")));
                self.shutdown(Notify::AfterResponse).await;
                return Err(e);
            }
        };

        self.pending.insert(PendingRequest::new(id, command, target))?;
        Ok(id)
    }

    /// Write one command line with a fresh id
    async fn send_command(&mut self, command: &str, arguments: Value) -> Result<u64> {
        let id = self.next_runtime_id;
        self.next_runtime_id += 1;

        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::invalid_state(command, "not connected to the runtime"));
        };

        if self.trace {
            tracing::info!(id, command, %arguments, "runtime >>>");
        }
        transport
            .send(&RuntimeCommand::new(id, command, arguments))
            .await?;
        Ok(id)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Terminated {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Running, stepping or stopped
    fn ensure_debuggee(&self, action: &str) -> Result<()> {
        self.ensure_open()?;
        match self.state {
            SessionState::Running | SessionState::Stepping | SessionState::Stopped => Ok(()),
            state => Err(Error::invalid_state(action, &state.to_string())),
        }
    }
}

fn stopped_event(reason: &str, description: Option<String>) -> Event {
    Event::Stopped(StoppedEventBody {
        reason: reason.to_string(),
        description,
        thread_id: THREAD_ID,
        all_threads_stopped: true,
    })
}

fn empty_variables() -> Value {
    json!({ "variables": [] })
}

/// Translate a runtime response body into the client's response body
fn client_body(query: &Query, body: Value) -> Result<Value> {
    let invalid = |e: serde_json::Error| Error::ProtocolViolation(format!("bad response body: {e}"));

    let value = match query {
        Query::StackTrace => {
            let body: StackTraceBody = serde_json::from_value(body).map_err(invalid)?;
            let stack_frames: Vec<StackFrame> = body
                .stack_frames
                .into_iter()
                .map(|frame| StackFrame {
                    id: frame.id,
                    name: frame.name,
                    source: frame.path.as_deref().map(Source::from_path),
                    line: frame.line,
                    column: frame.column,
                })
                .collect();
            let total_frames = body.total_frames.unwrap_or(stack_frames.len() as i64);
            serde_json::to_value(StackTraceResponseBody {
                stack_frames,
                total_frames: Some(total_frames),
            })?
        }
        Query::Variables => {
            let body: VariablesBody = serde_json::from_value(body).map_err(invalid)?;
            let variables = body
                .variables
                .into_iter()
                .map(|v| Variable {
                    name: v.name,
                    value: v.value,
                    type_name: v.type_name,
                    variables_reference: 0,
                })
                .collect();
            serde_json::to_value(VariablesResponseBody { variables })?
        }
        Query::Evaluate => {
            let body: EvaluateBody = serde_json::from_value(body).map_err(invalid)?;
            serde_json::to_value(EvaluateResponseBody {
                result: body.result,
                type_name: body.type_name,
                variables_reference: 0,
            })?
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::ResponseMessage as DapResponse;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;

    /// Runtime side of an attached session
    struct FakeRuntime {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl FakeRuntime {
        async fn recv(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, value: Value) {
            self.writer
                .write_all(format!("{value}\n").as_bytes())
                .await
                .unwrap();
        }
    }

    struct Harness {
        session: Session,
        inbox: mpsc::UnboundedReceiver<RuntimeInput>,
        outgoing: mpsc::UnboundedReceiver<OutgoingMessage>,
    }

    impl Harness {
        fn new(config: Config) -> Self {
            let (tx, outgoing) = mpsc::unbounded_channel();
            let mut session = Session::new(config, tx);
            let inbox = session.take_runtime_receiver().unwrap();
            Self {
                session,
                inbox,
                outgoing,
            }
        }

        fn initialized() -> Self {
            let mut harness = Self::new(test_config());
            harness
                .session
                .initialize(InitializeArguments::default())
                .unwrap();
            harness.session.flush_post_response();
            harness.drain();
            harness
        }

        async fn attach(&mut self) -> FakeRuntime {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

            self.session
                .attach(AttachArguments {
                    port: Some(port),
                    trace: false,
                })
                .await
                .unwrap();

            let (read, writer) = accept.await.unwrap().into_split();
            FakeRuntime {
                lines: BufReader::new(read).lines(),
                writer,
            }
        }

        /// Feed the next runtime-side notification into the session
        async fn pump(&mut self) {
            let input = self.inbox.recv().await.unwrap();
            self.session.handle_runtime_input(input).await;
        }

        fn drain(&mut self) -> Vec<OutgoingMessage> {
            let mut messages = Vec::new();
            while let Ok(message) = self.outgoing.try_recv() {
                messages.push(message);
            }
            messages
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.connect.max_attempts = 2;
        config.connect.retry_delay_ms = 10;
        config
    }

    fn responses(messages: &[OutgoingMessage]) -> Vec<&DapResponse> {
        messages
            .iter()
            .filter_map(|m| match m {
                OutgoingMessage::Response(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn event_names(messages: &[OutgoingMessage]) -> Vec<&'static str> {
        messages
            .iter()
            .filter_map(|m| match m {
                OutgoingMessage::Event(e) => Some(e.name()),
                _ => None,
            })
            .collect()
    }

    fn runtime_event(event: &str, body: Value) -> RuntimeInput {
        RuntimeInput::Message(
            RuntimeMessage::from_value(json!({"type": "event", "event": event, "body": body}))
                .unwrap(),
        )
    }

    #[test]
    fn test_initialize() {
        let mut harness = Harness::new(test_config());
        let caps = harness
            .session
            .initialize(InitializeArguments::default())
            .unwrap();

        assert!(caps.supports_configuration_done_request);
        assert!(caps.supports_cancel_request);
        assert_eq!(harness.session.state(), SessionState::Initialized);

        // The initialized event waits for the response
        assert!(harness.drain().is_empty());
        harness.session.flush_post_response();
        assert_eq!(event_names(&harness.drain()), vec!["initialized"]);

        let err = harness
            .session
            .initialize(InitializeArguments::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_commands_before_launch() {
        let harness = Harness::initialized();
        assert!(matches!(
            harness.session.threads(),
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_launch_missing_program_spawns_nothing() {
        let mut config = test_config();
        config.runtime.binary = PathBuf::from("/nonexistent/nyx-runtime");
        let mut harness = Harness::new(config);
        harness
            .session
            .initialize(InitializeArguments::default())
            .unwrap();

        let err = harness
            .session
            .launch(LaunchArguments {
                program: "/nonexistent/main.nx".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProgramNotFound(_)));
        assert!(!harness.session.has_process());
        assert_eq!(harness.session.state(), SessionState::Terminated);
        assert!(event_names(&harness.drain()).is_empty());
    }

    #[tokio::test]
    async fn test_attach_failure_terminates_quietly() {
        // Grab a free port and close it again
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut harness = Harness::initialized();
        let err = harness
            .session
            .attach(AttachArguments {
                port: Some(port),
                trace: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { attempts: 2, .. }));
        assert_eq!(harness.session.state(), SessionState::Terminated);
        assert!(event_names(&harness.drain()).is_empty());
    }

    #[tokio::test]
    async fn test_session_closed_after_disconnect() {
        let mut harness = Harness::initialized();
        harness.session.disconnect().await.unwrap();
        harness.session.flush_post_response();
        harness.session.disconnect().await.unwrap();
        harness.session.flush_post_response();

        assert_eq!(event_names(&harness.drain()), vec!["terminated"]);
        assert!(matches!(harness.session.threads(), Err(Error::SessionClosed)));
        assert!(matches!(
            harness.session.set_breakpoints("/a.nx", &[1]).await,
            Err(Error::SessionClosed)
        ));
        assert!(matches!(harness.session.scopes(1), Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_disconnect_terminated_follows_response() {
        let mut harness = Harness::initialized();
        let _runtime = harness.attach().await;

        harness.session.disconnect().await.unwrap();
        // Nothing goes out until the handler has written the response
        assert!(harness.drain().is_empty());
        assert_eq!(harness.session.state(), SessionState::Terminated);

        harness
            .session
            .respond(ResponseMessage::success(9, "disconnect", None));
        harness.session.flush_post_response();

        let messages = harness.drain();
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], OutgoingMessage::Response(r) if r.command == "disconnect"));
        assert!(matches!(&messages[1], OutgoingMessage::Event(Event::Terminated)));
    }

    #[tokio::test]
    async fn test_write_failure_terminates_after_response() {
        let mut harness = Harness::initialized();
        let _runtime = harness.attach().await;
        if let Some(transport) = harness.session.transport.as_mut() {
            transport.close().await;
        }

        let err = harness
            .session
            .resume(ResumeKind::Continue)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SocketError(_)));
        assert_eq!(harness.session.state(), SessionState::Terminated);
        assert_eq!(event_names(&harness.drain()), vec!["output"]);

        harness.session.flush_post_response();
        assert_eq!(event_names(&harness.drain()), vec!["terminated"]);
    }

    #[tokio::test]
    async fn test_breakpoint_replay_failure_fails_startup_quietly() {
        let mut harness = Harness::initialized();
        harness
            .session
            .set_breakpoints("/w/main.nx", &[4])
            .await
            .unwrap();

        // A connection that is gone before the replay is written
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = tokio::net::TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = RuntimeTransport::start(stream, tx);
        transport.close().await;

        let err = harness.session.adopt_transport(transport).await.unwrap_err();
        assert!(matches!(err, Error::SocketError(_)));
        assert_eq!(harness.session.pending_count(), 0);
        assert_eq!(harness.session.state(), SessionState::Initialized);

        // What a failed launch or attach does next
        harness.session.shutdown(Notify::Never).await;
        harness.session.flush_post_response();
        assert_eq!(harness.session.state(), SessionState::Terminated);
        assert!(harness.drain().is_empty());

        // Later teardown stays silent too
        harness.session.disconnect().await.unwrap();
        harness.session.flush_post_response();
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn test_scopes_are_stable() {
        let mut harness = Harness::initialized();
        let first = harness.session.scopes(3).unwrap();
        let second = harness.session.scopes(3).unwrap();
        let other = harness.session.scopes(4).unwrap();

        assert_eq!(first[0].name, "Local");
        assert_eq!(first[1].name, "Global");
        assert_eq!(first[0].variables_reference, second[0].variables_reference);
        assert_eq!(first[1].variables_reference, second[1].variables_reference);
        assert_ne!(first[0].variables_reference, other[0].variables_reference);
    }

    #[tokio::test]
    async fn test_unknown_variables_reference_is_empty() {
        let mut harness = Harness::initialized();
        let reply = harness.session.variables(7, 424242).await.unwrap();
        match reply {
            Reply::Now(Some(body)) => assert_eq!(body, json!({"variables": []})),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_breakpoints_replayed_on_attach() {
        let mut harness = Harness::initialized();
        let bps = harness
            .session
            .set_breakpoints("/w/main.nx", &[4, 9])
            .await
            .unwrap();
        assert_eq!(bps.len(), 2);
        assert_eq!(harness.session.breakpoints_for("/w/main.nx"), bps.as_slice());

        let mut runtime = harness.attach().await;
        let command = runtime.recv().await;
        assert_eq!(command["command"], "setBreakpoints");
        assert_eq!(command["arguments"], json!({"path": "/w/main.nx", "lines": [4, 9]}));
        assert_eq!(harness.session.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_correlates_response() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        let reply = harness
            .session
            .evaluate(
                12,
                EvaluateArguments {
                    expression: "1 + 2".to_string(),
                    frame_id: Some(0),
                    context: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Deferred));

        let command = runtime.recv().await;
        assert_eq!(command["command"], "evaluate");
        assert_eq!(command["arguments"]["expression"], "1 + 2");

        runtime
            .send(json!({"type": "response", "id": command["id"], "body": {"result": "3", "type": "int"}}))
            .await;
        harness.pump().await;

        let messages = harness.drain();
        let responses = responses(&messages);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].request_seq, 12);
        assert!(responses[0].success);
        let body = responses[0].body.as_ref().unwrap();
        assert_eq!(body["result"], "3");
        assert_eq!(body["type"], "int");
        assert_eq!(harness.session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_runtime_failure_is_reported() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        harness
            .session
            .stack_trace(5, StackTraceArguments::default())
            .await
            .unwrap();
        let command = runtime.recv().await;
        runtime
            .send(json!({"type": "response", "id": command["id"], "success": false, "message": "not paused"}))
            .await;
        harness.pump().await;

        let messages = harness.drain();
        let response = responses(&messages)[0];
        assert!(!response.success);
        assert_eq!(response.body.as_ref().unwrap()["error"]["id"], 2021);
    }

    #[tokio::test]
    async fn test_stopped_wins_over_resume_confirmation() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        harness.session.resume(ResumeKind::Continue).await.unwrap();
        assert_eq!(harness.session.state(), SessionState::Stepping);
        let command = runtime.recv().await;
        assert_eq!(command["command"], "continue");

        // Breakpoint hit before the runtime got around to confirming
        harness
            .session
            .handle_runtime_input(runtime_event("stopped", json!({"reason": "breakpoint"})))
            .await;
        runtime
            .send(json!({"type": "response", "id": command["id"]}))
            .await;
        harness.pump().await;

        assert_eq!(harness.session.state(), SessionState::Stopped);
        assert_eq!(event_names(&harness.drain()), vec!["stopped"]);
    }

    #[tokio::test]
    async fn test_resume_confirmation_settles_running() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        harness.session.resume(ResumeKind::Next).await.unwrap();
        let command = runtime.recv().await;
        assert_eq!(command["command"], "next");
        runtime
            .send(json!({"type": "response", "id": command["id"]}))
            .await;
        harness.pump().await;

        assert_eq!(harness.session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_socket_close_terminates_once() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        harness
            .session
            .evaluate(
                3,
                EvaluateArguments {
                    expression: "x".to_string(),
                    frame_id: None,
                    context: None,
                },
            )
            .await
            .unwrap();
        runtime.recv().await;
        drop(runtime);

        harness.pump().await;
        harness
            .session
            .handle_runtime_input(RuntimeInput::ProcessExited { code: Some(0) })
            .await;
        harness.session.disconnect().await.unwrap();

        let messages = harness.drain();
        assert_eq!(event_names(&messages), vec!["terminated"]);
        let responses = responses(&messages);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].request_seq, 3);
        assert_eq!(responses[0].message.as_deref(), Some("Debug session is closed"));
    }

    #[tokio::test]
    async fn test_pending_query_times_out() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        harness
            .session
            .stack_trace(9, StackTraceArguments::default())
            .await
            .unwrap();
        runtime.recv().await;

        harness.session.expire_pending(Instant::now());
        assert_eq!(harness.session.pending_count(), 1);

        harness
            .session
            .expire_pending(Instant::now() + Duration::from_secs(11));
        assert_eq!(harness.session.pending_count(), 0);

        let messages = harness.drain();
        let response = responses(&messages)[0];
        assert_eq!(response.request_seq, 9);
        assert_eq!(response.body.as_ref().unwrap()["error"]["id"], 2020);
    }

    #[tokio::test]
    async fn test_cancel_pending_query() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        harness
            .session
            .stack_trace(21, StackTraceArguments::default())
            .await
            .unwrap();
        let command = runtime.recv().await;
        harness.session.cancel(Some(21)).unwrap();

        // The late response is dropped
        runtime
            .send(json!({"type": "response", "id": command["id"], "body": {"stackFrames": []}}))
            .await;
        harness.pump().await;

        let messages = harness.drain();
        let responses = responses(&messages);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_protocol_violation_is_surfaced() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        runtime.writer.write_all(b"{oops\n").await.unwrap();
        runtime
            .send(json!({"type": "event", "event": "output", "body": {"output": "hi\n"}}))
            .await;
        harness.pump().await;
        harness.pump().await;

        let messages = harness.drain();
        let outputs: Vec<(String, String)> = messages
            .iter()
            .filter_map(|m| match m {
                OutgoingMessage::Event(Event::Output(body)) => {
                    Some((body.category.clone(), body.output.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            outputs,
            vec![
                ("stderr".to_string(), "Invalid protocol message: {oops\n".to_string()),
                ("console".to_string(), "hi\n".to_string()),
            ]
        );
        assert_eq!(harness.session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_stack_trace_mapping() {
        let mut harness = Harness::initialized();
        let mut runtime = harness.attach().await;

        harness
            .session
            .stack_trace(
                2,
                StackTraceArguments {
                    thread_id: THREAD_ID,
                    start_frame: Some(0),
                    levels: Some(20),
                },
            )
            .await
            .unwrap();
        let command = runtime.recv().await;
        assert_eq!(command["arguments"], json!({"startFrame": 0, "levels": 20}));

        runtime
            .send(json!({
                "type": "response",
                "id": command["id"],
                "body": {"stackFrames": [{"id": 0, "name": "main", "path": "/w/main.nx", "line": 3, "column": 1}]}
            }))
            .await;
        harness.pump().await;

        let messages = harness.drain();
        let body = responses(&messages)[0].body.clone().unwrap();
        assert_eq!(body["totalFrames"], 1);
        assert_eq!(body["stackFrames"][0]["source"]["name"], "main.nx");
        assert_eq!(body["stackFrames"][0]["line"], 3);
    }
}
