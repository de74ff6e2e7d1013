//! Unix domain socket server for the control protocol.
//!
//! One connection handler per client, newline-delimited JSON both ways.
//! Malformed lines and unknown methods answer with an error and keep the
//! connection open; only hangups and inactivity close it.

use crate::config::ConfigStore;
use crate::control::protocol::{self, Method, Request};
use crate::cycle::AutomationSwitch;
use crate::events::{CourierEvent, EventBus};
use crate::oracle::OracleKind;
use crate::session::Session;
use crate::site;
use crate::transport::Tabs;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Inactivity timeout per connection. Control requests are all fast; a
/// connection idle this long was abandoned by its client.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum request line size (64 KB). Control requests are tiny.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Everything a request handler can reach.
pub struct ControlState {
    started_at: Instant,
    started_wall: DateTime<Utc>,
    session: Arc<Session>,
    switch: AutomationSwitch,
    config: Arc<ConfigStore>,
    tabs: Arc<dyn Tabs>,
    events: Arc<EventBus>,
}

impl ControlState {
    pub fn new(
        session: Arc<Session>,
        switch: AutomationSwitch,
        config: Arc<ConfigStore>,
        tabs: Arc<dyn Tabs>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            started_wall: Utc::now(),
            session,
            switch,
            config,
            tabs,
            events,
        }
    }
}

/// The control socket server.
pub struct ControlServer {
    socket_path: PathBuf,
    state: Arc<ControlState>,
}

impl ControlServer {
    pub fn new(socket_path: &Path, state: ControlState) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            state: Arc::new(state),
        }
    }

    /// Accept connections until cancelled. Removes a stale socket file on
    /// startup and the live one on shutdown.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("failed to remove stale socket file")?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).context("failed to bind control socket")?;
        info!("control socket listening on {}", self.socket_path.display());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, state).await {
                                warn!("control connection error: {err:#}");
                            }
                        });
                    }
                    Err(err) => error!("control accept error: {err}"),
                },
                _ = cancel.cancelled() => break,
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("control socket closed");
        Ok(())
    }
}

/// Serve one client until it hangs up or goes quiet.
async fn handle_connection(
    stream: tokio::net::UnixStream,
    state: Arc<ControlState>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::time::timeout(INACTIVITY_TIMEOUT, reader.read_line(&mut line)).await;

        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                if line.len() > MAX_REQUEST_SIZE {
                    let resp = protocol::format_error(
                        "unknown",
                        "E_MESSAGE_TOO_LARGE",
                        &format!("request exceeds {} KB", MAX_REQUEST_SIZE / 1024),
                    );
                    writer.write_all(resp.as_bytes()).await.ok();
                    writer.flush().await.ok();
                    continue;
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match protocol::parse_request(trimmed) {
                    Ok(req) => handle_request(req, &state).await,
                    Err(err) => protocol::format_error("unknown", err.code(), &err.to_string()),
                };

                if writer.write_all(response.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            Ok(Err(err)) => {
                warn!("control read error: {err}");
                break;
            }
            Err(_) => {
                let resp = protocol::format_error(
                    "timeout",
                    "E_INACTIVITY_TIMEOUT",
                    "connection closed due to inactivity",
                );
                writer.write_all(resp.as_bytes()).await.ok();
                writer.flush().await.ok();
                break;
            }
        }
    }

    Ok(())
}

async fn handle_request(req: Request, state: &ControlState) -> String {
    match req.method {
        Method::Ping => protocol::format_response(
            &req.id,
            serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
        ),
        Method::Status => handle_status(&req, state).await,
        Method::Pause => handle_toggle(&req, state, false),
        Method::Resume => handle_toggle(&req, state, true),
        Method::Use => handle_use(&req, state).await,
    }
}

async fn handle_status(req: &Request, state: &ControlState) -> String {
    let snapshot = state.session.snapshot();
    let task_open = !state.tabs.query(&site::url_pattern()).await.is_empty();
    let oracle_kind = state.config.oracle_kind();
    let oracle_open = !state.tabs.query(&oracle_kind.url_pattern()).await.is_empty();

    protocol::format_response(
        &req.id,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_s": state.started_at.elapsed().as_secs(),
            "since": state.started_wall.to_rfc3339(),
            "automation": state.switch.is_on(),
            "oracle": oracle_kind.as_str(),
            "session": serde_json::to_value(&snapshot).unwrap_or_default(),
            "tabs": {
                "task": task_open,
                "oracle": oracle_open,
            },
        }),
    )
}

fn handle_toggle(req: &Request, state: &ControlState, on: bool) -> String {
    state.switch.set(on);
    state.events.emit(CourierEvent::AutomationChanged {
        on,
        reason: "control request".to_string(),
    });
    info!(automation = on, "automation toggled over control socket");
    protocol::format_response(&req.id, serde_json::json!({ "automation": on }))
}

async fn handle_use(req: &Request, state: &ControlState) -> String {
    let raw = match req.params.get("oracle").and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => s,
        _ => {
            return protocol::format_error(
                &req.id,
                "E_INVALID_PARAMS",
                "missing or empty 'oracle' parameter",
            );
        }
    };

    let kind = match OracleKind::parse(raw) {
        Ok(kind) => kind,
        Err(err) => {
            return protocol::format_error(&req.id, "E_INVALID_PARAMS", &err.to_string());
        }
    };

    if let Err(err) = state.config.set_oracle(kind) {
        return protocol::format_error(&req.id, "E_CONFIG", &format!("{err:#}"));
    }

    // The router reads the store on the next relay, so persisting is enough.
    // Availability tells the caller whether that oracle's tab is even open.
    let available = !state.tabs.query(&kind.url_pattern()).await.is_empty();
    info!(oracle = kind.as_str(), available, "oracle selection updated");

    protocol::format_response(
        &req.id,
        serde_json::json!({
            "oracle": kind.as_str(),
            "available": available,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ContextId, ContextInfo, TabEvent, UrlPattern, WindowId};
    use assert_json_diff::assert_json_include;
    use serde_json::Value;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixStream;
    use tokio::sync::broadcast;

    struct FakeTabs {
        tabs: Mutex<Vec<ContextInfo>>,
        events: broadcast::Sender<TabEvent>,
    }

    impl FakeTabs {
        fn new(tabs: Vec<ContextInfo>) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                tabs: Mutex::new(tabs),
                events,
            })
        }
    }

    #[async_trait::async_trait]
    impl Tabs for FakeTabs {
        async fn query(&self, pattern: &UrlPattern) -> Vec<ContextInfo> {
            self.tabs
                .lock()
                .unwrap()
                .iter()
                .filter(|t| pattern.matches(&t.url))
                .cloned()
                .collect()
        }

        async fn focus(&self, _context: ContextId) -> bool {
            true
        }

        fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
            self.events.subscribe()
        }
    }

    struct Harness {
        _dir: TempDir,
        switch: AutomationSwitch,
        config: Arc<ConfigStore>,
        cancel: CancellationToken,
        socket_path: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn start_server(tabs: Vec<ContextInfo>) -> Harness {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("courier.sock");
        let switch = AutomationSwitch::new(true);
        let config = Arc::new(ConfigStore::open(dir.path().join("config.json")));

        let state = ControlState::new(
            Arc::new(Session::new(OracleKind::ChatGpt)),
            switch.clone(),
            Arc::clone(&config),
            FakeTabs::new(tabs),
            Arc::new(EventBus::default()),
        );
        let server = ControlServer::new(&socket_path, state);
        let cancel = CancellationToken::new();

        let run_cancel = cancel.clone();
        tokio::spawn(async move { server.run(run_cancel).await.unwrap() });

        // Wait for the socket file to appear.
        for _ in 0..50 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Harness {
            _dir: dir,
            switch,
            config,
            cancel,
            socket_path,
        }
    }

    async fn roundtrip(stream: &mut UnixStream, line: &str) -> Value {
        stream
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        serde_json::from_slice(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let harness = start_server(vec![
            ContextInfo::new(
                ContextId(1),
                WindowId(1),
                "https://learning.mheducation.com/lesson/1",
            ),
            ContextInfo::new(ContextId(2), WindowId(2), "https://chatgpt.com/"),
        ])
        .await;

        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();

        let resp = roundtrip(&mut stream, r#"{"id":"p1","method":"ping","params":{}}"#).await;
        assert_eq!(resp["id"], "p1");
        assert!(resp["result"]["version"].as_str().is_some());

        let resp = roundtrip(&mut stream, r#"{"id":"s1","method":"status","params":{}}"#).await;
        assert_eq!(resp["id"], "s1");
        assert_json_include!(
            actual: resp["result"].clone(),
            expected: serde_json::json!({
                "automation": true,
                "oracle": "chatgpt",
                "tabs": { "task": true, "oracle": true },
                "session": { "relay_in_flight": false },
            })
        );
    }

    #[tokio::test]
    async fn test_pause_and_resume_flip_the_switch() {
        let harness = start_server(vec![]).await;
        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();

        let resp = roundtrip(&mut stream, r#"{"id":"x1","method":"pause","params":{}}"#).await;
        assert_eq!(resp["result"]["automation"], false);
        assert!(!harness.switch.is_on());

        let resp = roundtrip(&mut stream, r#"{"id":"x2","method":"resume","params":{}}"#).await;
        assert_eq!(resp["result"]["automation"], true);
        assert!(harness.switch.is_on());
    }

    #[tokio::test]
    async fn test_use_persists_and_reports_availability() {
        let harness = start_server(vec![ContextInfo::new(
            ContextId(3),
            WindowId(1),
            "https://gemini.google.com/app",
        )])
        .await;
        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();

        let resp = roundtrip(
            &mut stream,
            r#"{"id":"u1","method":"use","params":{"oracle":"gemini"}}"#,
        )
        .await;
        assert_eq!(resp["result"]["oracle"], "gemini");
        assert_eq!(resp["result"]["available"], true);
        assert_eq!(harness.config.oracle_kind(), OracleKind::Gemini);

        // DeepSeek has no open tab in this harness.
        let resp = roundtrip(
            &mut stream,
            r#"{"id":"u2","method":"use","params":{"oracle":"deepseek"}}"#,
        )
        .await;
        assert_eq!(resp["result"]["available"], false);

        let resp = roundtrip(
            &mut stream,
            r#"{"id":"u3","method":"use","params":{"oracle":"clippy"}}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], "E_INVALID_PARAMS");
    }

    #[tokio::test]
    async fn test_malformed_json_keeps_connection() {
        let harness = start_server(vec![]).await;
        let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();

        let resp = roundtrip(&mut stream, "this is not json").await;
        assert_eq!(resp["error"]["code"], "E_INVALID_JSON");

        // Same connection still answers valid requests.
        let resp = roundtrip(&mut stream, r#"{"id":"p2","method":"ping","params":{}}"#).await;
        assert_eq!(resp["id"], "p2");
        assert!(resp["result"]["version"].as_str().is_some());

        let resp = roundtrip(
            &mut stream,
            r#"{"id":"m1","method":"teleport","params":{}}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], "E_UNKNOWN_METHOD");
    }
}
