//! One-shot socket client for talking to a running daemon.

use crate::control;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Send one request to the default control socket and return its result.
pub async fn request(method: &str, params: Value) -> Result<Value> {
    request_at(&control::default_socket_path(), method, params).await
}

/// Send one request to the given socket and return its result. A response
/// carrying an error object becomes an `Err` with the daemon's message.
pub async fn request_at(socket_path: &Path, method: &str, params: Value) -> Result<Value> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "could not connect to {} (is the daemon running?)",
            socket_path.display()
        )
    })?;

    let id = uuid::Uuid::new_v4().to_string();
    let line = serde_json::json!({ "id": id, "method": method, "params": params });

    let (reader, mut writer) = stream.into_split();
    writer.write_all(format!("{line}\n").as_bytes()).await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader);
    let mut response = String::new();
    reader
        .read_line(&mut response)
        .await
        .context("daemon closed the connection")?;

    let v: Value =
        serde_json::from_str(response.trim()).context("malformed response from daemon")?;
    if let Some(err) = v.get("error") {
        bail!(
            "daemon refused {method}: {} ({})",
            err["message"].as_str().unwrap_or("unknown error"),
            err["code"].as_str().unwrap_or("unknown")
        );
    }
    Ok(v["result"].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    /// Serve exactly one connection, answering every request line with the
    /// canned response body (keyed to the request's id).
    async fn serve_one(listener: UnixListener, body: Value) {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        let req: Value = serde_json::from_str(line.trim()).unwrap();
        let mut resp = body;
        resp["id"] = req["id"].clone();
        writer
            .write_all(format!("{resp}\n").as_bytes())
            .await
            .unwrap();
        writer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_returns_result() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_one(
            listener,
            serde_json::json!({ "result": { "automation": true } }),
        ));

        let result = request_at(&path, "status", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result["automation"], true);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_response_becomes_err() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_one(
            listener,
            serde_json::json!({ "error": { "code": "E_INVALID_PARAMS", "message": "bad oracle" } }),
        ));

        let err = request_at(&path, "use", serde_json::json!({ "oracle": "nope" }))
            .await
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("bad oracle"));
        assert!(msg.contains("E_INVALID_PARAMS"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_socket_names_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.sock");
        let err = request_at(&path, "ping", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("absent.sock"));
    }
}
