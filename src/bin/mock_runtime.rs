//! Mock Nyx runtime binary for integration testing
//!
//! Accepts the same arguments as the real runtime (`--debug-port=N program`),
//! listens on the debug port and speaks newline-delimited JSON without
//! running any real code. The program file is only read for a few
//! directives that drive test scenarios:
//!
//! - `#exit N`: exit with code N right after the adapter connects
//! - `#garbage`: send one malformed line after connecting

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

fn main() {
    let mut port: u16 = 9229;
    let mut program: Option<String> = None;

    for arg in std::env::args().skip(1) {
        if let Some(value) = arg.strip_prefix("--debug-port=") {
            port = value.parse().unwrap_or(port);
        } else {
            program = Some(arg);
        }
    }

    let Some(program) = program else {
        eprintln!("usage: mock-runtime --debug-port=N <program>");
        std::process::exit(2);
    };
    let source = std::fs::read_to_string(&program).unwrap_or_default();

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock-runtime: cannot listen on port {port}: {e}");
            std::process::exit(1);
        }
    };
    println!("mock-runtime: debugging {program} on port {port}");
    std::io::stdout().flush().ok();

    let Ok((stream, _)) = listener.accept() else {
        std::process::exit(1);
    };

    let mut state = MockState::new(program, &source);
    let code = state.serve(stream);
    std::process::exit(code);
}

/// Write one message line
fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let line = format!("{message}\n");
    writer.write_all(line.as_bytes()).ok();
    writer.flush().ok();
}

struct MockState {
    program: String,
    exit_on_connect: Option<i32>,
    send_garbage: bool,
    line_count: u32,
    current_line: u32,
    breakpoints: HashMap<String, Vec<u32>>,
    locals: Vec<(String, String, String)>, // name, value, type
    globals: Vec<(String, String, String)>,
}

impl MockState {
    fn new(program: String, source: &str) -> Self {
        let mut exit_on_connect = None;
        let mut send_garbage = false;
        for line in source.lines() {
            let line = line.trim();
            if let Some(code) = line.strip_prefix("#exit ") {
                exit_on_connect = code.trim().parse().ok();
            } else if line == "#garbage" {
                send_garbage = true;
            }
        }

        Self {
            program,
            exit_on_connect,
            send_garbage,
            line_count: source.lines().count().max(1) as u32,
            current_line: 1,
            breakpoints: HashMap::new(),
            locals: vec![
                ("x".to_string(), "42".to_string(), "int".to_string()),
                ("name".to_string(), "\"nyx\"".to_string(), "string".to_string()),
            ],
            globals: vec![("VERSION".to_string(), "\"1.0\"".to_string(), "string".to_string())],
        }
    }

    /// Serve the adapter connection; returns the process exit code
    fn serve(&mut self, stream: TcpStream) -> i32 {
        let Ok(read_half) = stream.try_clone() else {
            return 1;
        };
        let mut reader = BufReader::new(read_half);
        let mut writer = stream;

        if let Some(code) = self.exit_on_connect {
            eprintln!("mock-runtime: exiting with code {code}");
            return code;
        }
        if self.send_garbage {
            writer.write_all(b"{this is not json\n").ok();
        }

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return 0,
                Ok(_) => {}
            }

            let message: Value = match serde_json::from_str(line.trim()) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let outcome = self.process_command(&message);
            for reply in &outcome.messages {
                send_message(&mut writer, reply);
            }
            if let Some(code) = outcome.exit {
                return code;
            }
        }
    }

    fn process_command(&mut self, message: &Value) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            return outcome;
        };
        let command = message
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let arguments = message.get("arguments").cloned().unwrap_or(json!({}));

        let result: Result<Value, String> = match command {
            "setBreakpoints" => {
                let path = arguments["path"].as_str().unwrap_or_default().to_string();
                let lines: Vec<u32> = arguments["lines"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|l| l.as_u64()).map(|l| l as u32).collect())
                    .unwrap_or_default();
                let count = lines.len();
                self.breakpoints.insert(path, lines);
                Ok(json!({ "count": count }))
            }
            "continue" => {
                outcome.messages.push(response(id, Ok(json!({}))));
                match self.next_breakpoint() {
                    Some(line) => {
                        self.current_line = line;
                        outcome
                            .messages
                            .push(event("stopped", json!({"reason": "breakpoint", "line": line})));
                    }
                    None => {
                        outcome.messages.push(event(
                            "output",
                            json!({"output": "program finished\n", "category": "stdout"}),
                        ));
                        outcome.exit = Some(0);
                    }
                }
                return outcome;
            }
            "next" | "stepIn" | "stepOut" => {
                outcome.messages.push(response(id, Ok(json!({}))));
                self.current_line = (self.current_line + 1).min(self.line_count);
                outcome.messages.push(event(
                    "stopped",
                    json!({"reason": "step", "line": self.current_line}),
                ));
                return outcome;
            }
            "stackTrace" => Ok(json!({
                "stackFrames": [
                    {"id": 0, "name": "main", "path": self.program, "line": self.current_line, "column": 1}
                ],
                "totalFrames": 1
            })),
            "variables" => {
                let vars = match arguments["scope"].as_str() {
                    Some("global") => &self.globals,
                    _ => &self.locals,
                };
                let variables: Vec<Value> = vars
                    .iter()
                    .map(|(name, value, ty)| json!({"name": name, "value": value, "type": ty}))
                    .collect();
                Ok(json!({ "variables": variables }))
            }
            "evaluate" => {
                let expression = arguments["expression"].as_str().unwrap_or_default();
                if expression == "hang" {
                    // Never answered
                    return outcome;
                }
                self.locals
                    .iter()
                    .chain(self.globals.iter())
                    .find(|(name, _, _)| name == expression)
                    .map(|(_, value, ty)| json!({"result": value, "type": ty}))
                    .ok_or_else(|| format!("Undefined variable '{expression}'"))
            }
            other => Err(format!("Unknown command '{other}'")),
        };

        outcome.messages.push(response(id, result));
        outcome
    }

    fn next_breakpoint(&self) -> Option<u32> {
        self.breakpoints
            .get(&self.program)?
            .iter()
            .copied()
            .filter(|&line| line > self.current_line)
            .min()
    }
}

/// Replies to one command, plus whether the process should end
#[derive(Default)]
struct Outcome {
    messages: Vec<Value>,
    exit: Option<i32>,
}

fn response(id: u64, result: Result<Value, String>) -> Value {
    match result {
        Ok(body) => json!({"type": "response", "id": id, "success": true, "body": body}),
        Err(message) => json!({"type": "response", "id": id, "success": false, "message": message}),
    }
}

fn event(name: &str, body: Value) -> Value {
    json!({"type": "event", "event": name, "body": body})
}
