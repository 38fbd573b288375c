//! The outer rendering boundary.
//!
//! A [`Frame`] runs as its own task and owns the inner [`Isolate`]. The host
//! reaches it only through a [`FrameHandle`], whose envelopes carry the
//! host's origin; envelopes from any other origin are rejected. The frame
//! turns raw worker responses into host-facing shapes: attribute lists become
//! maps and base64 query results are decoded.
//!
//! Calls are processed strictly in order. If a caller stops waiting, the
//! frame still finishes the call and then drops the response.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ownables_state_store::StateDump;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{ProtocolViolation, Result, SandboxError};
use crate::isolate::{Isolate, SessionState};
use crate::protocol::{MessageInfo, ModuleResponse, Operation, Outcome, Request};

const QUEUE_CAPACITY: usize = 32;

/// Frame settings.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// The only origin RPC envelopes are accepted from.
    pub origin: String,
    /// How long a caller waits before abandoning a call.
    pub call_timeout: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            origin: "ownables://host".to_string(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

enum Call {
    Init {
        ownable_id: String,
        bytecode: Vec<u8>,
    },
    Instantiate {
        msg: JsonValue,
        info: MessageInfo,
    },
    Execute {
        msg: JsonValue,
        info: MessageInfo,
        mem: StateDump,
    },
    ExternalEvent {
        msg: JsonValue,
        info: MessageInfo,
        mem: StateDump,
    },
    Query {
        msg: JsonValue,
        mem: StateDump,
    },
    Refresh {
        mem: StateDump,
    },
    Shutdown,
}

impl Call {
    fn name(&self) -> &'static str {
        match self {
            Call::Init { .. } => "init",
            Call::Instantiate { .. } => "instantiate",
            Call::Execute { .. } => "execute",
            Call::ExternalEvent { .. } => "external_event",
            Call::Query { .. } => "query",
            Call::Refresh { .. } => "refresh",
            Call::Shutdown => "shutdown",
        }
    }
}

enum Reply {
    Done,
    Outcome(Outcome),
    Raw(String),
    Json(JsonValue),
}

struct Envelope {
    origin: String,
    call: Call,
    reply: oneshot::Sender<Result<Reply>>,
}

/// The outer boundary task.
pub struct Frame<I> {
    isolate: I,
    origin: String,
    ownable_id: Option<String>,
    state: watch::Sender<SessionState>,
    widget: watch::Sender<Option<JsonValue>>,
}

impl<I: Isolate + 'static> Frame<I> {
    /// Start a frame around `isolate` and return a handle to it.
    pub fn spawn(isolate: I, config: FrameConfig) -> FrameHandle {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (state, state_rx) = watch::channel(SessionState::Uninitialized);
        let (widget, widget_rx) = watch::channel(None);

        let frame = Frame {
            isolate,
            origin: config.origin.clone(),
            ownable_id: None,
            state,
            widget,
        };
        tokio::spawn(frame.run(rx));

        FrameHandle {
            tx,
            origin: config.origin,
            timeout: config.call_timeout,
            state: state_rx,
            widget: widget_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Envelope>) {
        while let Some(Envelope {
            origin,
            call,
            reply,
        }) = rx.recv().await
        {
            if origin != self.origin {
                warn!(origin = %origin, "rejecting rpc from foreign origin");
                let _ = reply.send(Err(ProtocolViolation::ForeignOrigin(origin).into()));
                continue;
            }

            let name = call.name();
            let stop = matches!(call, Call::Shutdown);
            let result = self.handle(call).await;

            if reply.send(result).is_err() {
                warn!(
                    ownable_id = self.ownable_id.as_deref().unwrap_or("-"),
                    call = name,
                    "discarding abandoned response"
                );
            }
            if stop {
                break;
            }
        }

        self.isolate.shutdown().await;
        self.state.send_replace(SessionState::Closed);
        debug!(ownable_id = self.ownable_id.as_deref().unwrap_or("-"), "frame closed");
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn ownable_id(&self) -> Result<String> {
        self.ownable_id
            .clone()
            .ok_or_else(|| ProtocolViolation::NotInitialized.into())
    }

    async fn handle(&mut self, call: Call) -> Result<Reply> {
        match call {
            Call::Init {
                ownable_id,
                bytecode,
            } => {
                if self.ownable_id.is_some() {
                    return Err(ProtocolViolation::AlreadyInitialized.into());
                }
                self.set_state(SessionState::Initializing);
                if let Err(e) = self.isolate.init(&bytecode).await {
                    self.set_state(SessionState::Uninitialized);
                    return Err(e);
                }
                info!(ownable_id = %ownable_id, "sandbox initialized");
                self.ownable_id = Some(ownable_id);
                self.set_state(SessionState::Ready);
                Ok(Reply::Done)
            }
            Call::Instantiate { msg, info } => {
                let ownable_id = self.ownable_id()?;
                let request = Request::Instantiate {
                    ownable_id,
                    msg,
                    info,
                };
                self.state_change(request).await.map(Reply::Outcome)
            }
            Call::Execute { msg, info, mem } => {
                let request = Request::Execute {
                    ownable_id: self.ownable_id()?,
                    msg,
                    info,
                    mem: mem.into(),
                };
                self.state_change(request).await.map(Reply::Outcome)
            }
            Call::ExternalEvent { msg, info, mem } => {
                let request = Request::ExternalEvent {
                    ownable_id: self.ownable_id()?,
                    msg,
                    info,
                    mem: mem.into(),
                };
                self.state_change(request).await.map(Reply::Outcome)
            }
            Call::Query { msg, mem } => self.query_raw(msg, mem).await.map(Reply::Raw),
            Call::Refresh { mem } => {
                let raw = self.query_raw(json!({"get_widget_state": {}}), mem).await?;
                let widget = decode_query(&raw)?;
                self.widget.send_replace(Some(widget.clone()));
                Ok(Reply::Json(widget))
            }
            Call::Shutdown => Ok(Reply::Done),
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<(JsonValue, Option<StateDump>)> {
        let op = request.operation();
        self.set_state(SessionState::Busy);
        let response = self.isolate.call(request).await;
        self.set_state(SessionState::Ready);
        response?.into_result(op)
    }

    async fn state_change(&mut self, request: Request) -> Result<Outcome> {
        let op = request.operation();
        let (state, mem) = self.dispatch(request).await?;
        let mem = mem.ok_or_else(|| ProtocolViolation::UnexpectedResponse(op.to_string()))?;
        let response: ModuleResponse = serde_json::from_value(state)?;
        Ok(Outcome::from_response(response, mem))
    }

    async fn query_raw(&mut self, msg: JsonValue, mem: StateDump) -> Result<String> {
        let request = Request::Query {
            ownable_id: self.ownable_id()?,
            msg,
            mem: mem.into(),
        };
        match self.dispatch(request).await? {
            (JsonValue::String(raw), _) => Ok(raw),
            _ => Err(ProtocolViolation::UnexpectedResponse(Operation::Query.to_string()).into()),
        }
    }
}

/// Decode a base64 JSON query result.
pub fn decode_query(raw: &str) -> Result<JsonValue> {
    let bytes = BASE64.decode(raw.trim()).map_err(|e| {
        SandboxError::Execution(crate::error::ExecutionError::Query(format!(
            "invalid base64 data: {}",
            e
        )))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// The host's side of a frame.
///
/// Cloning yields another handle to the same frame; the frame stops when
/// every handle is dropped or [`FrameHandle::shutdown`] is called.
#[derive(Clone)]
pub struct FrameHandle {
    tx: mpsc::Sender<Envelope>,
    origin: String,
    timeout: Duration,
    state: watch::Receiver<SessionState>,
    widget: watch::Receiver<Option<JsonValue>>,
}

impl FrameHandle {
    /// A handle that presents a different origin.
    pub fn with_origin(&self, origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..self.clone()
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Widget state published by [`FrameHandle::refresh`].
    pub fn widget_state(&self) -> watch::Receiver<Option<JsonValue>> {
        self.widget.clone()
    }

    async fn send(&self, call: Call) -> Result<Reply> {
        let name = call.name();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                origin: self.origin.clone(),
                call,
                reply,
            })
            .await
            .map_err(|_| ProtocolViolation::Closed)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => {
                warn!(call = name, "sandbox call timed out");
                Err(SandboxError::Timeout)
            }
            Ok(Err(_)) => Err(ProtocolViolation::Closed.into()),
            Ok(Ok(result)) => result,
        }
    }

    async fn send_outcome(&self, call: Call) -> Result<Outcome> {
        let name = call.name();
        match self.send(call).await? {
            Reply::Outcome(outcome) => Ok(outcome),
            _ => Err(ProtocolViolation::UnexpectedResponse(name.to_string()).into()),
        }
    }

    /// Load the module for `ownable_id`.
    pub async fn init(&self, ownable_id: impl Into<String>, bytecode: Vec<u8>) -> Result<()> {
        self.send(Call::Init {
            ownable_id: ownable_id.into(),
            bytecode,
        })
        .await
        .map(|_| ())
    }

    pub async fn instantiate(&self, msg: JsonValue, info: MessageInfo) -> Result<Outcome> {
        self.send_outcome(Call::Instantiate { msg, info }).await
    }

    pub async fn execute(
        &self,
        msg: JsonValue,
        info: MessageInfo,
        mem: StateDump,
    ) -> Result<Outcome> {
        self.send_outcome(Call::Execute { msg, info, mem }).await
    }

    pub async fn external_event(
        &self,
        msg: JsonValue,
        info: MessageInfo,
        mem: StateDump,
    ) -> Result<Outcome> {
        self.send_outcome(Call::ExternalEvent { msg, info, mem })
            .await
    }

    /// Query and return the raw base64 result.
    pub async fn query_raw(&self, msg: JsonValue, mem: StateDump) -> Result<String> {
        match self.send(Call::Query { msg, mem }).await? {
            Reply::Raw(raw) => Ok(raw),
            _ => Err(ProtocolViolation::UnexpectedResponse("query".to_string()).into()),
        }
    }

    /// Query and decode the JSON result.
    pub async fn query(&self, msg: JsonValue, mem: StateDump) -> Result<JsonValue> {
        decode_query(&self.query_raw(msg, mem).await?)
    }

    /// Query the widget state and publish it to [`FrameHandle::widget_state`] subscribers.
    pub async fn refresh(&self, mem: StateDump) -> Result<JsonValue> {
        match self.send(Call::Refresh { mem }).await? {
            Reply::Json(widget) => Ok(widget),
            _ => Err(ProtocolViolation::UnexpectedResponse("refresh".to_string()).into()),
        }
    }

    /// Stop the frame and its isolate.
    pub async fn shutdown(&self) {
        if let Err(e) = self.send(Call::Shutdown).await {
            debug!(error = %e, "frame already stopped");
        }
    }
}

impl std::fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHandle")
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish()
    }
}
