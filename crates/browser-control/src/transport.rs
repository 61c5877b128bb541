//! Raw CDP command/event plumbing.
//!
//! A single websocket connection per ghost context. Commands flow
//! through an mpsc control channel into the connection loop; responses
//! resolve oneshot responders keyed by `CallId`; protocol events fan
//! out to the session's event pump. A periodic `Browser.getVersion`
//! probe keeps the alive flag honest.

use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::errors::ControlError;

/// A protocol event forwarded to the session event pump.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Whether a command addresses the browser endpoint or an attached
/// target session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, ControlError>;

    async fn next_event(&self) -> Option<TransportEvent>;

    fn is_alive(&self) -> bool;

    /// Tear down the connection loop. Idempotent.
    fn shutdown(&self);
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, ControlError>>,
}

/// Live websocket transport.
pub struct ChromiumTransport {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
}

impl ChromiumTransport {
    /// Connect to an already-discovered websocket debugger URL.
    pub async fn connect(ws_url: &str, heartbeat_interval: Duration) -> Result<Self, ControlError> {
        let conn = Connection::<CdpEventMessage>::connect(ws_url)
            .await
            .map_err(|err| ControlError::Protocol(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();

        let loop_task = tokio::spawn(async move {
            let result = run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "ghost-transport", %err, "connection loop terminated");
            }
        });

        let heartbeat_task =
            spawn_heartbeat(command_tx.clone(), alive.clone(), heartbeat_interval);

        info!(target: "ghost-transport", url = %ws_url, "cdp connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task,
            alive,
        })
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, ControlError> {
        if !self.is_alive() {
            return Err(ControlError::TargetClosed("transport is down".into()));
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|_| ControlError::TargetClosed("command channel closed".into()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ControlError::TargetClosed(
                "command response channel closed".into(),
            )),
            Err(_) => Err(ControlError::Timeout(format!("{method} timed out"))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }
    }
}

impl Drop for ChromiumTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<ControlMessage>,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Result<(), ControlError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, ControlError>>> =
        HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                submit(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        resolve(resp, &mut inflight);
                    }
                    Some(Ok(Message::Event(event))) => {
                        forward(event, &event_tx).await;
                    }
                    Some(Err(err)) => {
                        let control_err = map_cdp_error(err);
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(control_err.clone()));
                        }
                        return Err(control_err);
                    }
                    None => {
                        let err = ControlError::TargetClosed("cdp connection closed".into());
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(err.clone()));
                        }
                        return Err(err);
                    }
                }
            }
        }
    }
}

fn submit(
    conn: &mut Connection<CdpEventMessage>,
    cmd: ControlMessage,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ControlError>>>,
) -> Result<(), ControlError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.clone().into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let control_err = ControlError::Protocol(err.to_string());
            let _ = cmd.responder.send(Err(control_err.clone()));
            Err(control_err)
        }
    }
}

fn resolve(
    resp: Response,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ControlError>>>,
) {
    let entry = inflight.remove(&resp.id);
    let result = extract_payload(resp);
    if let Some(sender) = entry {
        let _ = sender.send(result);
    }
}

async fn forward(event: CdpEventMessage, event_tx: &mpsc::Sender<TransportEvent>) {
    let raw: Result<CdpJsonEventMessage, _> = event.try_into();
    match raw {
        Ok(raw) => {
            let payload = TransportEvent {
                method: raw.method.into_owned(),
                params: raw.params,
                session_id: raw.session_id,
            };
            if event_tx.send(payload).await.is_err() {
                debug!(target: "ghost-transport", "event consumer dropped");
            }
        }
        Err(err) => {
            warn!(target: "ghost-transport", %err, "undecodable cdp event");
        }
    }
}

fn extract_payload(resp: Response) -> Result<Value, ControlError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        Err(ControlError::Protocol(format!(
            "cdp error {}: {}",
            error.code, error.message
        )))
    } else {
        Err(ControlError::Protocol("empty cdp response".into()))
    }
}

fn map_cdp_error(err: CdpError) -> ControlError {
    let text = err.to_string();
    match err {
        CdpError::Timeout => ControlError::Timeout(text),
        CdpError::Ws(_) | CdpError::Io(_) | CdpError::ChannelSendError(_) => {
            ControlError::TargetClosed(text)
        }
        _ => ControlError::Protocol(text),
    }
}

fn spawn_heartbeat(
    sender: mpsc::Sender<ControlMessage>,
    alive: Arc<AtomicBool>,
    period: Duration,
) -> Option<JoinHandle<()>> {
    if period.as_millis() == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            if !alive.load(Ordering::Relaxed) {
                break;
            }

            let (resp_tx, resp_rx) = oneshot::channel();
            let probe = ControlMessage {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: Value::Object(Default::default()),
                responder: resp_tx,
            };

            if sender.send(probe).await.is_err() {
                break;
            }

            match tokio::time::timeout(Duration::from_secs(5), resp_rx).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "ghost-transport", %err, "heartbeat command error");
                    alive.store(false, Ordering::Relaxed);
                    break;
                }
                Ok(Err(_)) | Err(_) => {
                    warn!(target: "ghost-transport", "heartbeat lost");
                    alive.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }))
}
