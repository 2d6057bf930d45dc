//! Mock MCP server for integration testing.
//!
//! Responds to initialize, tools/list and tools/call. Every tools/call runs
//! on its own thread, so responses to concurrent calls may arrive out of
//! order.
//!
//! Usage:
//!   mock-mcp-server [--framing lines|content-length] [--startup-delay-ms N]
//!                   [--garbage-on TOOL] [--duplicate-responses] [--ping-on-init]
//!                   [--stop-reading-after-init]
//!
//! Options:
//!   --framing F             Wire framing (default: lines)
//!   --startup-delay-ms N    Sleep N ms before answering initialize
//!   --garbage-on TOOL       Reply to TOOL with a frame that is not JSON
//!   --duplicate-responses   Send every tools/call response twice
//!   --ping-on-init          Send a ping request after answering initialize
//!   --stop-reading-after-init
//!                           Answer initialize, then never read stdin again

use std::env;
use std::io::{BufRead, BufReader, Read, Stdout, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

#[derive(Clone, Copy, PartialEq)]
enum Framing {
    Lines,
    ContentLength,
}

/// Server configuration parsed from command line.
#[derive(Clone)]
struct Options {
    framing: Framing,
    startup_delay_ms: u64,
    garbage_on: Option<String>,
    duplicate_responses: bool,
    ping_on_init: bool,
    stop_reading_after_init: bool,
}

impl Options {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut options = Self {
            framing: Framing::Lines,
            startup_delay_ms: 0,
            garbage_on: None,
            duplicate_responses: false,
            ping_on_init: false,
            stop_reading_after_init: false,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--framing" => {
                    if value.as_deref() == Some("content-length") {
                        options.framing = Framing::ContentLength;
                    }
                    i += 2;
                }
                "--startup-delay-ms" => {
                    options.startup_delay_ms = value.and_then(|v| v.parse().ok()).unwrap_or(0);
                    i += 2;
                }
                "--garbage-on" => {
                    options.garbage_on = value;
                    i += 2;
                }
                "--duplicate-responses" => {
                    options.duplicate_responses = true;
                    i += 1;
                }
                "--ping-on-init" => {
                    options.ping_on_init = true;
                    i += 1;
                }
                "--stop-reading-after-init" => {
                    options.stop_reading_after_init = true;
                    i += 1;
                }
                _ => i += 1,
            }
        }
        options
    }
}

type Output = Arc<Mutex<Stdout>>;

fn write_raw(out: &Output, framing: Framing, body: &str) {
    let mut stdout = out.lock().unwrap();
    let _ = match framing {
        Framing::Lines => writeln!(stdout, "{body}"),
        Framing::ContentLength => write!(stdout, "Content-Length: {}\r\n\r\n{body}", body.len()),
    };
    let _ = stdout.flush();
}

fn write_message(out: &Output, framing: Framing, message: &Value) {
    write_raw(out, framing, &message.to_string());
}

/// Read one frame. `None` at end of input.
fn read_frame(reader: &mut impl BufRead, framing: Framing) -> Option<String> {
    match framing {
        Framing::Lines => loop {
            let mut line = String::new();
            if reader.read_line(&mut line).ok()? == 0 {
                return None;
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        },
        Framing::ContentLength => {
            let mut content_length: Option<usize> = None;
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).ok()? == 0 {
                    return None;
                }
                let trimmed = header.trim();
                if trimmed.is_empty() {
                    if content_length.is_some() {
                        break;
                    }
                    continue;
                }
                if let Some((name, value)) = trimmed.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().ok();
                }
            }
            let mut body = vec![0u8; content_length?];
            reader.read_exact(&mut body).ok()?;
            String::from_utf8(body).ok()
        }
    }
}

fn main() {
    let options = Options::from_args();
    let out: Output = Arc::new(Mutex::new(std::io::stdout()));
    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());

    while let Some(frame) = read_frame(&mut reader, options.framing) {
        let Ok(message) = serde_json::from_str::<Value>(&frame) else {
            continue;
        };
        // Notifications and responses to our own requests.
        let (Some(id), Some(method)) = (message.get("id").cloned(), message["method"].as_str())
        else {
            continue;
        };

        match method {
            "initialize" => {
                if options.startup_delay_ms > 0 {
                    thread::sleep(Duration::from_millis(options.startup_delay_ms));
                }
                let result = json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock-mcp-server", "version": "1.0.0"}
                });
                write_message(&out, options.framing, &success(id, result));
                if options.ping_on_init {
                    let ping = json!({"jsonrpc": "2.0", "id": "mock-ping-1", "method": "ping"});
                    write_message(&out, options.framing, &ping);
                }
                if options.stop_reading_after_init {
                    // Keep stdin open but unread so the client's pipe fills up.
                    loop {
                        thread::sleep(Duration::from_secs(60));
                    }
                }
            }
            "tools/list" => {
                write_message(&out, options.framing, &success(id, tool_list()));
            }
            "tools/call" => {
                let out = Arc::clone(&out);
                let options = options.clone();
                let params = message.get("params").cloned().unwrap_or(json!({}));
                thread::spawn(move || call_tool(&out, &options, id, &params));
            }
            other => {
                let error = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("Method not found: {other}")}
                });
                write_message(&out, options.framing, &error);
            }
        }
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn text(text: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": text.into()}]})
}

fn tool_error(message: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": message.into()}], "isError": true})
}

fn call_tool(out: &Output, options: &Options, id: Value, params: &Value) {
    let tool = params["name"].as_str().unwrap_or("");
    let args = &params["arguments"];

    if options.garbage_on.as_deref() == Some(tool) {
        write_raw(out, options.framing, "this is not json");
        return;
    }

    let result = match tool {
        "echo" => {
            let message = args["text"]
                .as_str()
                .or_else(|| args["message"].as_str())
                .unwrap_or("");
            text(message)
        }
        "add" => {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            text(format!("{}", a + b))
        }
        "slow" => {
            let delay = args["delay_ms"].as_u64().unwrap_or(1000);
            thread::sleep(Duration::from_millis(delay));
            text(format!("Slept for {delay} ms"))
        }
        "crash" => std::process::exit(1),
        "write_file" => {
            let path = args["path"].as_str().unwrap_or("");
            let content = args["content"].as_str().unwrap_or("");
            match std::fs::write(path, content) {
                Ok(()) => text(format!("wrote {} bytes to {path}", content.len())),
                Err(e) => tool_error(format!("failed to write {path}: {e}")),
            }
        }
        "notify" => {
            let note = json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": {"level": "info", "data": args["message"]}
            });
            write_message(out, options.framing, &note);
            text("notified")
        }
        other => tool_error(format!("Tool not found: {other}")),
    };

    let response = success(id, result);
    write_message(out, options.framing, &response);
    if options.duplicate_responses {
        write_message(out, options.framing, &response);
    }
}

fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Echo back the input",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}}
                }
            },
            {
                "name": "add",
                "description": "Add two numbers",
                "inputSchema": {
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }
            },
            {
                "name": "slow",
                "description": "Sleep before answering",
                "inputSchema": {
                    "type": "object",
                    "properties": {"delay_ms": {"type": "number"}}
                }
            },
            {
                "name": "crash",
                "description": "Exit the server immediately",
                "inputSchema": {"type": "object", "properties": {}}
            },
            {
                "name": "write_file",
                "description": "Write content to a path",
                "inputSchema": {
                    "type": "object",
                    "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                    "required": ["path", "content"]
                }
            },
            {
                "name": "notify",
                "description": "Emit a notification before answering",
                "inputSchema": {
                    "type": "object",
                    "properties": {"message": {"type": "string"}}
                }
            }
        ]
    })
}
