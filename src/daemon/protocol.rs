//! Daemon protocol: request/response types for CLI-daemon communication.
//!
//! One JSON object per line in each direction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Request from CLI to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    /// Check if daemon is alive
    #[serde(rename = "ping")]
    Ping,

    /// Indexer progress and database counts
    #[serde(rename = "status")]
    Status,

    /// Symbol declared or used at a source position (1-based)
    #[serde(rename = "symbol")]
    Symbol {
        file: PathBuf,
        line: u32,
        column: u32,
    },

    /// Symbol by USR
    #[serde(rename = "lookup")]
    Lookup { usr: String },

    /// Files including a header
    #[serde(rename = "includers")]
    Includers { header: PathBuf },

    /// Stop the daemon
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response from daemon to CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    /// Successful response with JSON data
    #[serde(rename = "ok")]
    Ok { data: serde_json::Value },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },

    /// Pong response (daemon is alive)
    #[serde(rename = "pong")]
    Pong,

    /// Shutdown acknowledgment
    #[serde(rename = "goodbye")]
    Goodbye,
}

impl Response {
    /// Wrap `data`, or an error response if it does not serialize.
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Response::Ok { data },
            Err(e) => Response::error(format!("cannot serialize response: {}", e)),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&Request::Symbol {
            file: PathBuf::from("src/a.c"),
            line: 3,
            column: 7,
        })
        .unwrap();
        assert_eq!(json, r#"{"command":"symbol","file":"src/a.c","line":3,"column":7}"#);

        let parsed: Request = serde_json::from_str(r#"{"command":"lookup","usr":"c:@F@main"}"#).unwrap();
        assert_eq!(parsed, Request::Lookup { usr: "c:@F@main".into() });

        let parsed: Request = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
        assert_eq!(parsed, Request::Ping);
    }

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_string(&Response::ok(vec!["a.c"])).unwrap();
        assert_eq!(json, r#"{"status":"ok","data":["a.c"]}"#);
        let json = serde_json::to_string(&Response::error("boom")).unwrap();
        assert_eq!(json, r#"{"status":"error","message":"boom"}"#);
        assert_eq!(serde_json::to_string(&Response::Pong).unwrap(), r#"{"status":"pong"}"#);
    }

    #[test]
    fn test_unserializable_data_becomes_error() {
        // JSON object keys must be strings.
        let mut data = std::collections::BTreeMap::new();
        data.insert((1u8, 2u8), "x");
        match Response::ok(data) {
            Response::Error { message } => assert!(message.starts_with("cannot serialize response")),
            other => panic!("expected error response, got {:?}", other),
        }
    }
}
