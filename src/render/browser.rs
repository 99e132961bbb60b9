//! Headless-browser adapter
//!
//! PDF rasterization via one of two strategies, chosen by configuration and
//! transparent to the caller:
//!
//! - `remote`: connect to an external browser's devtools websocket endpoint
//!   and drive it over CDP (`Target.createTarget`, `Page.printToPDF`).
//! - `local`: launch a headless browser process per render with
//!   `--print-to-pdf`, sandbox disabled for containerized environments.
//!
//! Both paths hand back raw PDF bytes; the caller validates non-emptiness.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use super::RenderError;
use crate::config::{BrowserStrategy, RenderConfig};

#[derive(Clone)]
pub struct BrowserRasterizer {
    strategy: BrowserStrategy,
    endpoint: Option<String>,
    browser_path: PathBuf,
    timeout: Duration,
}

impl BrowserRasterizer {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            strategy: config.browser,
            endpoint: config.browser_endpoint.clone(),
            browser_path: config.browser_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Render an HTML document to PDF bytes.
    pub async fn print_to_pdf(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let bytes = match self.strategy {
            BrowserStrategy::Remote => {
                tokio::time::timeout(self.timeout, self.print_remote(html))
                    .await
                    .map_err(|_| RenderError::Browser("render deadline exceeded".to_string()))??
            }
            BrowserStrategy::Local => self.print_local(html).await?,
        };

        if bytes.is_empty() {
            return Err(RenderError::EmptyOutput);
        }
        Ok(bytes)
    }

    /// Health probe used before each render on the remote strategy.
    pub async fn health_check(&self) -> Result<(), RenderError> {
        match self.strategy {
            BrowserStrategy::Remote => {
                self.debugger_url().await?;
                Ok(())
            }
            BrowserStrategy::Local => {
                if self.browser_path.is_absolute() && !self.browser_path.exists() {
                    return Err(RenderError::Browser(format!(
                        "browser executable not found: {}",
                        self.browser_path.display()
                    )));
                }
                Ok(())
            }
        }
    }

    async fn debugger_url(&self) -> Result<String, RenderError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| RenderError::Browser("no browser endpoint configured".to_string()))?;
        let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));

        let response: Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| RenderError::Browser(format!("browser unreachable: {e}")))?
            .json()
            .await
            .map_err(|e| RenderError::Browser(format!("browser version response: {e}")))?;

        response
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RenderError::Browser("no webSocketDebuggerUrl in version response".to_string()))
    }

    async fn print_remote(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let ws_url = self.debugger_url().await?;
        let (stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| RenderError::Browser(format!("websocket connect: {e}")))?;
        let mut cdp = CdpConnection::new(stream);

        let data_url = format!(
            "data:text/html;base64,{}",
            BASE64.encode(html.as_bytes())
        );

        let created = cdp
            .call(None, "Target.createTarget", json!({"url": "about:blank"}))
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or_else(|| RenderError::Browser("no targetId".to_string()))?
            .to_string();

        let attached = cdp
            .call(
                None,
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        let session = attached["sessionId"]
            .as_str()
            .ok_or_else(|| RenderError::Browser("no sessionId".to_string()))?
            .to_string();

        cdp.call(Some(&session), "Page.enable", json!({})).await?;
        cdp.call(Some(&session), "Page.navigate", json!({"url": data_url}))
            .await?;
        cdp.wait_for_event(&session, "Page.loadEventFired").await?;

        let printed = cdp
            .call(
                Some(&session),
                "Page.printToPDF",
                json!({"printBackground": true, "preferCSSPageSize": true}),
            )
            .await?;
        let encoded = printed["data"]
            .as_str()
            .ok_or_else(|| RenderError::Browser("no pdf data in response".to_string()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| RenderError::Browser(format!("pdf decode: {e}")))?;

        if let Err(err) = cdp
            .call(None, "Target.closeTarget", json!({"targetId": target_id}))
            .await
        {
            warn!(error = %err, "Failed to close browser target");
        }

        Ok(bytes)
    }

    async fn print_local(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let token = Uuid::now_v7();
        let dir = std::env::temp_dir();
        let html_path = dir.join(format!("cvforge-render-{token}.html"));
        let pdf_path = dir.join(format!("cvforge-render-{token}.pdf"));

        tokio::fs::write(&html_path, html)
            .await
            .map_err(|e| RenderError::Browser(format!("write render input: {e}")))?;

        let result = self.run_browser(&html_path, &pdf_path).await;

        let _ = tokio::fs::remove_file(&html_path).await;
        let bytes = match result {
            Ok(()) => tokio::fs::read(&pdf_path)
                .await
                .map_err(|e| RenderError::Browser(format!("read render output: {e}"))),
            Err(err) => Err(err),
        };
        let _ = tokio::fs::remove_file(&pdf_path).await;

        bytes
    }

    async fn run_browser(
        &self,
        html_path: &std::path::Path,
        pdf_path: &std::path::Path,
    ) -> Result<(), RenderError> {
        debug!(browser = %self.browser_path.display(), "Launching headless browser");
        let mut command = tokio::process::Command::new(&self.browser_path);
        command
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", pdf_path.display()))
            .arg(format!("file://{}", html_path.display()))
            .kill_on_drop(true)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let status = tokio::time::timeout(self.timeout, async {
            command
                .spawn()
                .map_err(|e| RenderError::Browser(format!("spawn browser: {e}")))?
                .wait()
                .await
                .map_err(|e| RenderError::Browser(format!("browser wait: {e}")))
        })
        .await
        .map_err(|_| RenderError::Browser("render deadline exceeded".to_string()))??;

        if !status.success() {
            return Err(RenderError::Browser(format!(
                "browser exited with {status}"
            )));
        }
        Ok(())
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Thin CDP JSON-RPC client over one websocket.
struct CdpConnection {
    stream: WsStream,
    next_id: u64,
}

impl CdpConnection {
    fn new(stream: WsStream) -> Self {
        Self { stream, next_id: 1 }
    }

    /// Send a command and wait for its response, buffering unrelated events.
    async fn call(
        &mut self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, RenderError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut message = json!({"id": id, "method": method, "params": params});
        if let Some(session) = session_id {
            message["sessionId"] = json!(session);
        }

        self.stream
            .send(Message::Text(message.to_string().into()))
            .await
            .map_err(|e| RenderError::Browser(format!("cdp send: {e}")))?;

        loop {
            let frame = self.next_json().await?;
            if frame.get("id").and_then(Value::as_u64) == Some(id) {
                if let Some(error) = frame.get("error") {
                    return Err(RenderError::Browser(format!("cdp {method}: {error}")));
                }
                return Ok(frame.get("result").cloned().unwrap_or(Value::Null));
            }
            // Event frames for other sessions are dropped
        }
    }

    async fn wait_for_event(&mut self, session_id: &str, event: &str) -> Result<(), RenderError> {
        loop {
            let frame = self.next_json().await?;
            let matches_method = frame.get("method").and_then(Value::as_str) == Some(event);
            let matches_session =
                frame.get("sessionId").and_then(Value::as_str) == Some(session_id);
            if matches_method && matches_session {
                return Ok(());
            }
        }
    }

    async fn next_json(&mut self) -> Result<Value, RenderError> {
        loop {
            let message = self
                .stream
                .next()
                .await
                .ok_or_else(|| RenderError::Browser("browser closed connection".to_string()))?
                .map_err(|e| RenderError::Browser(format!("cdp receive: {e}")))?;
            if let Message::Text(text) = message {
                return serde_json::from_str(&text)
                    .map_err(|e| RenderError::Browser(format!("cdp frame: {e}")));
            }
        }
    }
}
