//! Debugging-endpoint discovery.
//!
//! The host exposes a JSON version endpoint with the browser-level
//! websocket URL; targets are matched by the `#ghost-context=<id>`
//! fragment. When no endpoint answers, a local headless browser can be
//! launched as a fallback and its websocket URL harvested from stderr.

use std::time::Duration;

use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ControlConfig;
use crate::errors::ControlError;

/// Resolve `{webSocketDebuggerUrl}` from the host's version endpoint.
pub async fn browser_ws_url(cfg: &ControlConfig) -> Result<String, ControlError> {
    let endpoint = cfg.version_endpoint();
    let response = reqwest::get(&endpoint)
        .await
        .map_err(|err| ControlError::Protocol(format!("version endpoint unreachable: {err}")))?;
    let body: Value = response
        .json()
        .await
        .map_err(|err| ControlError::Protocol(format!("version endpoint not json: {err}")))?;

    body.get("webSocketDebuggerUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ControlError::Protocol(format!("no webSocketDebuggerUrl in {endpoint} response"))
        })
}

/// List targets and return the targetId whose URL carries the given
/// ghost-context fragment marker.
pub async fn find_target_id(cfg: &ControlConfig, marker: &str) -> Result<String, ControlError> {
    let endpoint = cfg.list_endpoint();
    let response = reqwest::get(&endpoint)
        .await
        .map_err(|err| ControlError::Protocol(format!("list endpoint unreachable: {err}")))?;
    let body: Value = response
        .json()
        .await
        .map_err(|err| ControlError::Protocol(format!("list endpoint not json: {err}")))?;

    let targets = body
        .as_array()
        .ok_or_else(|| ControlError::Protocol("list endpoint returned non-array".into()))?;

    for target in targets {
        let url = target.get("url").and_then(Value::as_str).unwrap_or("");
        if url.contains(marker) {
            if let Some(id) = target.get("id").and_then(Value::as_str) {
                debug!(target: "ghost-discovery", %marker, target_id = %id, "matched ghost target");
                return Ok(id.to_string());
            }
        }
    }

    Err(ControlError::Protocol(format!(
        "no target matching {marker} at {endpoint}"
    )))
}

/// Launch a local headless browser and return its websocket URL.
/// Fallback path for development without an embedding host.
pub async fn launch_local(cfg: &ControlConfig) -> Result<(Child, String), ControlError> {
    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-sync",
        "--metrics-recording-only",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    } else if let Ok(found) = which::which("chromium")
        .or_else(|_| which::which("chromium-browser"))
        .or_else(|_| which::which("google-chrome"))
    {
        builder = builder.chrome_executable(found);
    }
    builder = builder.user_data_dir(cfg.user_data_dir.clone());

    let config = builder
        .build()
        .map_err(|err| ControlError::Protocol(format!("browser config error: {err}")))?;

    let mut child = config
        .launch()
        .map_err(|err| ControlError::Protocol(format!("failed to launch browser: {err}")))?;

    let ws_url = harvest_ws_url(&mut child).await?;
    info!(target: "ghost-discovery", url = %ws_url, "local browser launched");
    Ok((child, ws_url))
}

/// Read the devtools websocket URL from the launched browser's stderr.
async fn harvest_ws_url(child: &mut Child) -> Result<String, ControlError> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ControlError::Protocol("browser process missing stderr".into()))?;
    let mut lines = BufReader::new(stderr).lines();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| ControlError::Protocol(err.to_string()))?;
            if let Some((_, ws)) = line.rsplit_once("listening on ") {
                let ws = ws.trim();
                if ws.starts_with("ws") && ws.contains("devtools/browser") {
                    return Ok(ws.to_string());
                }
            }
        }
        Err(ControlError::Protocol(
            "browser exited before exposing a websocket url".into(),
        ))
    };

    tokio::time::timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| ControlError::Timeout("waiting for browser websocket url".into()))?
}
