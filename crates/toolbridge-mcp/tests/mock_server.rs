//! Mock tool server for integration testing.
//!
//! Speaks newline-delimited JSON-RPC on stdio and answers initialize,
//! tools/list, and tools/call.
//!
//! Usage:
//!   mock-tool-server [--delay-ms N] [--crash-on-start] [--single-tool]
//!                    [--stray-response] [--garbage] [--notify]
//!
//! Options:
//!   --delay-ms N        Add N ms delay to all responses
//!   --crash-on-start    Write a diagnostic to stderr and exit 3 before reading
//!   --single-tool       Advertise only `search_tables_by_name`
//!   --stray-response    Emit a response with an unknown id before each reply
//!   --garbage           Emit a malformed line before each reply
//!   --notify            Emit a log notification before each reply

use std::env;
use std::io::{BufRead, BufReader, Write};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

#[derive(Default)]
struct ServerConfig {
    delay_ms: u64,
    crash_on_start: bool,
    single_tool: bool,
    stray_response: bool,
    garbage: bool,
    notify: bool,
}

impl ServerConfig {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().skip(1).collect();
        let mut config = Self::default();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--delay-ms" => {
                    config.delay_ms = args.get(i + 1).and_then(|v| v.parse().ok()).unwrap_or(0);
                    i += 1;
                }
                "--crash-on-start" => config.crash_on_start = true,
                "--single-tool" => config.single_tool = true,
                "--stray-response" => config.stray_response = true,
                "--garbage" => config.garbage = true,
                "--notify" => config.notify = true,
                _ => {}
            }
            i += 1;
        }

        config
    }
}

fn main() {
    let config = ServerConfig::from_args();

    if config.crash_on_start {
        eprintln!("ORA-12154: TNS:could not resolve the connect identifier specified");
        std::process::exit(3);
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());

    for line in reader.lines() {
        let Ok(line) = line else {
            return;
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        // Notifications carry no id and get no reply.
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            continue;
        };
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let params = message.get("params").cloned().unwrap_or(json!({}));

        if config.delay_ms > 0 {
            thread::sleep(Duration::from_millis(config.delay_ms));
        }

        let mut out = String::new();
        if config.garbage {
            out.push_str("this is not json {\n");
        }
        if config.notify {
            out.push_str(
                &json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": format!("handling {method}")}
                })
                .to_string(),
            );
            out.push('\n');
        }
        if config.stray_response {
            out.push_str(&json!({"jsonrpc": "2.0", "id": 999_999, "result": {}}).to_string());
            out.push('\n');
        }

        let response = handle_request(id, method, &params, &config);
        out.push_str(&response.to_string());
        out.push('\n');

        if stdout.write_all(out.as_bytes()).is_err() || stdout.flush().is_err() {
            return;
        }
    }
}

fn handle_request(id: u64, method: &str, params: &Value, config: &ServerConfig) -> Value {
    let result = match method {
        "initialize" => Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "mock-tool-server",
                "version": "1.0.0"
            }
        })),
        "tools/list" => Some(json!({ "tools": tool_catalog(config.single_tool) })),
        "tools/call" => {
            let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let args = params.get("arguments").cloned().unwrap_or(json!({}));

            match tool_name {
                "search_tables_by_name" => {
                    let pattern = args
                        .get("name_pattern")
                        .and_then(Value::as_str)
                        .unwrap_or("%");
                    Some(json!({
                        "content": format!("Tables matching '{}':\nORDERS\nORDER_ITEMS", pattern)
                    }))
                }
                "echo" => {
                    let message = args.get("message").and_then(Value::as_str).unwrap_or("");
                    Some(json!({
                        "content": [
                            { "type": "text", "text": message }
                        ]
                    }))
                }
                "slow" => {
                    let delay = args
                        .get("delay_ms")
                        .and_then(Value::as_u64)
                        .unwrap_or(1000);
                    thread::sleep(Duration::from_millis(delay));
                    Some(json!({
                        "content": [
                            { "type": "text", "text": format!("Slept for {} ms", delay) }
                        ]
                    }))
                }
                "fail" => {
                    return json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32000, "message": "ORA-00942: table or view does not exist"}
                    });
                }
                "crash" => {
                    eprintln!("fatal: connection pool exhausted");
                    std::process::exit(1);
                }
                _ => Some(json!({
                    "content": [
                        { "type": "text", "text": format!("Unknown tool: {}", tool_name) }
                    ],
                    "isError": true
                })),
            }
        }
        _ => None,
    };

    match result {
        Some(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        None => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": -32601,
                "message": format!("Method not found: {}", method)
            }
        }),
    }
}

fn tool_catalog(single: bool) -> Value {
    let search = json!({
        "name": "search_tables_by_name",
        "description": "Search database tables by name pattern",
        "inputSchema": {
            "type": "object",
            "properties": {
                "name_pattern": { "type": "string" }
            },
            "required": ["name_pattern"]
        }
    });
    if single {
        return json!([search]);
    }

    json!([
        search,
        {
            "name": "echo",
            "description": "Echo back the input",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }
        },
        {
            "name": "slow",
            "description": "A slow tool for testing timeouts",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "delay_ms": { "type": "number" }
                }
            }
        },
        {
            "name": "fail",
            "description": "Always answers with a JSON-RPC error",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "crash",
            "description": "Crashes the server (for testing)",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}
