//! In-process worker isolate.
//!
//! The worker runs as its own tokio task and owns the module. The host posts
//! messages to it and receives responses as later messages on a second
//! channel; there is no request id, so at most one call is outstanding and
//! any response left over from an abandoned call is drained before the next
//! call is sent.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ProtocolViolation, Result, SandboxError};
use crate::isolate::{Isolate, SessionState};
use crate::memory::Memory;
use crate::module::{ModuleRegistry, ModuleResult, Ownable};
use crate::protocol::{ModuleResponse, Request, Response};

const CHANNEL_CAPACITY: usize = 16;

enum WorkerMessage {
    Init(Vec<u8>),
    Call(Request),
}

/// An isolate backed by a worker task and a [`ModuleRegistry`].
pub struct WorkerIsolate {
    tx: mpsc::Sender<WorkerMessage>,
    rx: mpsc::Receiver<Response>,
    task: JoinHandle<()>,
    state: SessionState,
    /// Messages sent whose response has not been received.
    outstanding: usize,
    timeout: Option<Duration>,
}

impl WorkerIsolate {
    /// Spawn a worker on the current tokio runtime.
    pub fn spawn(registry: ModuleRegistry) -> Self {
        let (tx, worker_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (worker_tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(run_worker(registry, worker_rx, worker_tx));

        Self {
            tx,
            rx,
            task,
            state: SessionState::Uninitialized,
            outstanding: 0,
            timeout: None,
        }
    }

    /// Give up waiting for a response after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    async fn recv(&mut self) -> Result<Response> {
        let next = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.rx.recv())
                .await
                .map_err(|_| SandboxError::Timeout)?,
            None => self.rx.recv().await,
        };
        let response = next.ok_or(ProtocolViolation::Closed)?;
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(response)
    }

    async fn drain_abandoned(&mut self) -> Result<()> {
        while self.outstanding > 0 {
            let _stale = self.recv().await?;
            warn!("discarding abandoned worker response");
        }
        Ok(())
    }

    async fn round_trip(&mut self, message: WorkerMessage) -> Result<Response> {
        self.drain_abandoned().await?;
        self.tx
            .send(message)
            .await
            .map_err(|_| ProtocolViolation::Closed)?;
        self.outstanding += 1;
        self.recv().await
    }
}

#[async_trait]
impl Isolate for WorkerIsolate {
    async fn init(&mut self, bytecode: &[u8]) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(ProtocolViolation::AlreadyInitialized.into());
        }
        self.state = SessionState::Initializing;

        match self.round_trip(WorkerMessage::Init(bytecode.to_vec())).await? {
            Response::Ok { .. } => {
                debug!(bytes = bytecode.len(), "worker initialized");
                self.state = SessionState::Ready;
                Ok(())
            }
            Response::Err { err } => {
                self.state = SessionState::Uninitialized;
                Err(SandboxError::Bytecode(err))
            }
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response> {
        match self.state {
            SessionState::Ready => {}
            // A previous call was abandoned; its response is drained below.
            SessionState::Busy if self.outstanding > 0 => {}
            SessionState::Closed => return Err(ProtocolViolation::Closed.into()),
            _ => return Err(ProtocolViolation::NotInitialized.into()),
        }

        debug!(op = %request.operation(), ownable_id = request.ownable_id(), "worker call");
        self.state = SessionState::Busy;
        let response = self.round_trip(WorkerMessage::Call(request)).await?;
        self.state = SessionState::Ready;
        Ok(response)
    }

    async fn shutdown(&mut self) {
        self.state = SessionState::Closed;
        self.task.abort();
    }
}

impl Drop for WorkerIsolate {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_worker(
    registry: ModuleRegistry,
    mut rx: mpsc::Receiver<WorkerMessage>,
    tx: mpsc::Sender<Response>,
) {
    let mut module: Option<Box<dyn Ownable>> = None;

    while let Some(message) = rx.recv().await {
        let response = match message {
            WorkerMessage::Init(bytecode) => match registry.resolve(&bytecode) {
                Some(loaded) => {
                    module = Some(loaded);
                    Response::ok(json!({"success": true}), None)
                }
                None => Response::err("unrecognised module bytecode"),
            },
            WorkerMessage::Call(request) => match module.as_deref() {
                Some(module) => dispatch(module, request),
                None => Response::err("not initialized"),
            },
        };

        if tx.send(response).await.is_err() {
            break;
        }
    }
}

/// Run `request` against `module`, producing the wire response.
///
/// Memory is rebuilt from the request's dump and only dumped back on success.
pub(crate) fn dispatch(module: &dyn Ownable, request: Request) -> Response {
    match request {
        Request::Instantiate { msg, info, .. } => {
            let mut memory = Memory::new();
            let result = module.instantiate(&mut memory, &msg, &info);
            state_change(result, memory)
        }
        Request::Execute { msg, info, mem, .. } => {
            let mut memory = Memory::from(mem.state_dump);
            let result = module.execute(&mut memory, &msg, &info);
            state_change(result, memory)
        }
        Request::ExternalEvent { msg, info, mem, .. } => {
            let mut memory = Memory::from(mem.state_dump);
            let result = module.external_event(&mut memory, &msg, &info);
            state_change(result, memory)
        }
        Request::Query { msg, mem, .. } => {
            let memory = Memory::from(mem.state_dump);
            let encoded = module.query(&memory, &msg).and_then(|answer| {
                let bytes = serde_json::to_vec(&answer)?;
                Ok(JsonValue::String(BASE64.encode(bytes)))
            });
            match encoded {
                Ok(state) => Response::ok(state, None),
                Err(e) => Response::err(e.to_string()),
            }
        }
    }
}

fn state_change(result: ModuleResult<ModuleResponse>, memory: Memory) -> Response {
    let state = result.and_then(|response| Ok(serde_json::to_value(response)?));
    match state {
        Ok(state) => Response::ok(state, Some(memory.dump().into())),
        Err(e) => Response::err(e.to_string()),
    }
}
