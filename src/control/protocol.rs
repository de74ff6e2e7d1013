//! Request parsing and response formatting for the control socket.
//!
//! Messages are newline-delimited JSON over a Unix domain socket:
//! `{id, method, params}` in, `{id, result}` or `{id, error}` out.

use serde_json::Value;
use thiserror::Error;

/// Methods the control socket answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Ping,
    Status,
    Pause,
    Resume,
    Use,
}

impl Method {
    pub fn parse(s: &str) -> Result<Self, RequestError> {
        match s {
            "ping" => Ok(Self::Ping),
            "status" => Ok(Self::Status),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "use" => Ok(Self::Use),
            other => Err(RequestError::UnknownMethod(other.to_string())),
        }
    }
}

/// A parsed request line.
#[derive(Debug)]
pub struct Request {
    pub id: String,
    pub method: Method,
    pub params: Value,
}

/// Why a request line could not be turned into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing 'method' field")]
    MissingMethod,
    #[error("unknown method: {0}")]
    UnknownMethod(String),
}

impl RequestError {
    /// Stable error code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Json(_) => "E_INVALID_JSON",
            Self::MissingMethod => "E_INVALID_PARAMS",
            Self::UnknownMethod(_) => "E_UNKNOWN_METHOD",
        }
    }
}

/// Parse a request line into id, method, and params.
///
/// A missing id reads as `"unknown"` so error responses still carry
/// something the client can correlate on.
pub fn parse_request(json: &str) -> Result<Request, RequestError> {
    let v: Value = serde_json::from_str(json)?;

    let id = v
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let method_str = v
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or(RequestError::MissingMethod)?;
    let method = Method::parse(method_str)?;

    let params = v
        .get("params")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));

    Ok(Request { id, method, params })
}

/// Format a successful response as a newline-terminated JSON string.
pub fn format_response(id: &str, result: Value) -> String {
    let resp = serde_json::json!({
        "id": id,
        "result": result,
    });
    format!("{resp}\n")
}

/// Format an error response as a newline-terminated JSON string.
pub fn format_error(id: &str, code: &str, message: &str) -> String {
    let resp = serde_json::json!({
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    });
    format!("{resp}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_request() {
        let json = r#"{"id": "r1", "method": "ping", "params": {}}"#;
        let req = parse_request(json).unwrap();
        assert_eq!(req.id, "r1");
        assert_eq!(req.method, Method::Ping);
    }

    #[test]
    fn test_parse_use_request_keeps_params() {
        let json = r#"{"id": "u1", "method": "use", "params": {"oracle": "gemini"}}"#;
        let req = parse_request(json).unwrap();
        assert_eq!(req.method, Method::Use);
        assert_eq!(req.params["oracle"], "gemini");
    }

    #[test]
    fn test_parse_missing_id_reads_unknown() {
        let json = r#"{"method": "status"}"#;
        let req = parse_request(json).unwrap();
        assert_eq!(req.id, "unknown");
        assert_eq!(req.method, Method::Status);
    }

    #[test]
    fn test_parse_unknown_method() {
        let err = parse_request(r#"{"id": "x", "method": "teleport", "params": {}}"#).unwrap_err();
        assert_eq!(err.code(), "E_UNKNOWN_METHOD");
    }

    #[test]
    fn test_parse_missing_method() {
        let err = parse_request(r#"{"id": "x", "params": {}}"#).unwrap_err();
        assert_eq!(err.code(), "E_INVALID_PARAMS");
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_request("this is not json").unwrap_err();
        assert_eq!(err.code(), "E_INVALID_JSON");
    }

    #[test]
    fn test_format_response() {
        let resp = format_response("r1", serde_json::json!({"ok": true}));
        assert!(resp.ends_with('\n'));
        let parsed: Value = serde_json::from_str(resp.trim()).unwrap();
        assert_eq!(parsed["id"], "r1");
        assert_eq!(parsed["result"]["ok"], true);
    }

    #[test]
    fn test_format_error() {
        let resp = format_error("r2", "E_UNKNOWN_METHOD", "unknown method: teleport");
        let parsed: Value = serde_json::from_str(resp.trim()).unwrap();
        assert_eq!(parsed["id"], "r2");
        assert_eq!(parsed["error"]["code"], "E_UNKNOWN_METHOD");
    }
}
