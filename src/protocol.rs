//! LSP protocol communication utilities.

use std::{
    io::{BufRead, Read, Write, stdout},
    path::PathBuf,
};

use lsp_types::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::LSError;

/// JSON-RPC error code for bodies that are not JSON.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC error code for unknown methods.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code for bad parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code for failures inside the server.
pub const INTERNAL_ERROR: i64 = -32603;

/// Write a JSON-RPC message with its Content-Length header.
pub fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), LSError>
where
    W: Write,
    T: ?Sized + Serialize,
{
    let msg = serde_json::to_string(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n{}", msg.len(), msg)?;
    writer.flush()?;
    Ok(())
}

/// Send a JSON-RPC message to stdout.
pub fn send<T>(message: &T) -> Result<(), LSError>
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    log::debug!("send stdout: {message:?}");
    write_message(&mut stdout().lock(), message)
}

/// Read one JSON-RPC message. `None` when the stream ended.
///
/// A body that is not JSON is consumed before the error is returned, so the
/// next call starts at the following frame.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<Value>, LSError> {
    let mut size = None;
    loop {
        let mut buffer = String::new();
        if reader.read_line(&mut buffer)? == 0 {
            return Ok(None);
        }
        // The end of header section
        if buffer == "\r\n" || buffer == "\n" {
            break;
        }

        let (name, value) = buffer
            .split_once(':')
            .ok_or_else(|| LSError::MalformedHeader(buffer.trim_end().to_string()))?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            let length = value
                .trim()
                .parse::<usize>()
                .map_err(|_| LSError::MalformedHeader(buffer.trim_end().to_string()))?;
            size = Some(length);
        }
    }

    let size = size.ok_or_else(|| LSError::MalformedHeader("missing Content-Length".into()))?;
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf)?;
    let message = String::from_utf8(buf)?;
    Ok(Some(serde_json::from_str(&message)?))
}

/// JSON-RPC error message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    jsonrpc: String,
    id: Value,
    pub error: Value,
}

impl ErrorMessage {
    #[must_use]
    pub fn new(id: Option<Value>, error: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: id.unwrap_or(Value::Null),
            error,
        }
    }
}

/// Send a JSON-RPC error response.
pub fn send_error<S: Into<String>>(id: Option<Value>, code: i64, msg: S) -> Result<(), LSError> {
    send(&ErrorMessage::new(
        id,
        json!({ "code": code, "message": msg.into() }),
    ))
}

/// Send a successful response to a request.
pub fn respond<T: Serialize>(id: &Value, result: &T) -> Result<(), LSError> {
    send(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    }))
}

/// Send a notification.
pub fn notify<T: Serialize>(method: &str, params: &T) -> Result<(), LSError> {
    send(&json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    }))
}

/// Convert a file:// URI to a file path.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, LSError> {
    Url::parse(uri)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| LSError::InvalidUri(uri.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn messages_round_trip_through_the_framing() {
        let mut buffer = Vec::new();
        let message = json!({"jsonrpc": "2.0", "method": "initialized", "params": {}});
        write_message(&mut buffer, &message).unwrap();
        write_message(&mut buffer, &json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();

        let mut reader = Cursor::new(buffer);
        assert_eq!(read_message(&mut reader).unwrap(), Some(message));
        assert_eq!(read_message(&mut reader).unwrap().unwrap()["id"], 1);
        assert_eq!(read_message(&mut reader).unwrap(), None);
    }

    #[test]
    fn extra_headers_are_ignored() {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let message = read_message(&mut Cursor::new(raw)).unwrap().unwrap();
        assert_eq!(message["method"], "exit");
    }

    #[test]
    fn a_bad_body_does_not_desync_the_stream() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"Content-Length: 9\r\n\r\n{not json");
        write_message(&mut raw, &json!({"jsonrpc": "2.0", "method": "exit"})).unwrap();

        let mut reader = Cursor::new(raw);
        assert!(matches!(read_message(&mut reader), Err(LSError::Json(_))));
        assert_eq!(read_message(&mut reader).unwrap().unwrap()["method"], "exit");
    }

    #[test]
    fn bad_headers_are_errors() {
        let result = read_message(&mut Cursor::new("Content-Length: many\r\n\r\n{}"));
        assert!(matches!(result, Err(LSError::MalformedHeader(_))));

        let result = read_message(&mut Cursor::new("\r\n{}"));
        assert!(matches!(result, Err(LSError::MalformedHeader(_))));
    }

    #[test]
    fn file_uris_convert_to_paths() {
        assert_eq!(
            uri_to_path("file:///p/tests/FooTest.php").unwrap(),
            PathBuf::from("/p/tests/FooTest.php")
        );
        assert!(matches!(
            uri_to_path("untitled:Untitled-1"),
            Err(LSError::InvalidUri(_))
        ));
    }
}
