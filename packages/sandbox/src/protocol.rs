//! Wire messages exchanged with the inner computation boundary.
//!
//! Requests are `{type, ownable_id, msg, info, mem}` objects tagged by
//! `type`; responses are either `{state, mem?}` or `{err}`. Memory travels as
//! `{state_dump: [[key, value], ...]}`.

use std::collections::BTreeMap;

use ownables_state_store::StateDump;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ExecutionError, ProtocolViolation, Result, SandboxError};

/// Tokens attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Who sent a message, and what they attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub sender: String,
    #[serde(default)]
    pub funds: Vec<Coin>,
}

impl MessageInfo {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            funds: Vec::new(),
        }
    }
}

/// Memory as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemPayload {
    pub state_dump: StateDump,
}

impl From<StateDump> for MemPayload {
    fn from(state_dump: StateDump) -> Self {
        Self { state_dump }
    }
}

/// The operation kinds a module understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Instantiate,
    Execute,
    ExternalEvent,
    Query,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Instantiate => "instantiate",
            Operation::Execute => "execute",
            Operation::ExternalEvent => "external_event",
            Operation::Query => "query",
        }
    }

    fn failure(&self, cause: String) -> ExecutionError {
        match self {
            Operation::Instantiate => ExecutionError::InstantiationFailed(cause),
            Operation::Execute | Operation::ExternalEvent => ExecutionError::Failed(cause),
            Operation::Query => ExecutionError::Query(cause),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to the inner boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Instantiate {
        ownable_id: String,
        msg: JsonValue,
        info: MessageInfo,
    },
    Execute {
        ownable_id: String,
        msg: JsonValue,
        info: MessageInfo,
        #[serde(alias = "idb")]
        mem: MemPayload,
    },
    ExternalEvent {
        ownable_id: String,
        msg: JsonValue,
        info: MessageInfo,
        #[serde(alias = "idb")]
        mem: MemPayload,
    },
    Query {
        ownable_id: String,
        msg: JsonValue,
        #[serde(alias = "idb")]
        mem: MemPayload,
    },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Instantiate { .. } => Operation::Instantiate,
            Request::Execute { .. } => Operation::Execute,
            Request::ExternalEvent { .. } => Operation::ExternalEvent,
            Request::Query { .. } => Operation::Query,
        }
    }

    pub fn ownable_id(&self) -> &str {
        match self {
            Request::Instantiate { ownable_id, .. }
            | Request::Execute { ownable_id, .. }
            | Request::ExternalEvent { ownable_id, .. }
            | Request::Query { ownable_id, .. } => ownable_id,
        }
    }

    /// Parse a request, reporting an unrecognised `type` as a protocol violation.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        if !matches!(
            kind.as_str(),
            "instantiate" | "execute" | "external_event" | "query"
        ) {
            return Err(ProtocolViolation::UnknownMessage(kind).into());
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// A response from the inner boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Err {
        err: String,
    },
    Ok {
        #[serde(alias = "result")]
        state: JsonValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mem: Option<MemPayload>,
    },
}

impl Response {
    pub fn ok(state: JsonValue, mem: Option<MemPayload>) -> Self {
        Response::Ok { state, mem }
    }

    pub fn err(err: impl Into<String>) -> Self {
        Response::Err { err: err.into() }
    }

    /// Check the response against the operation that produced it.
    ///
    /// State-changing operations must return memory; queries must not.
    pub fn into_result(self, op: Operation) -> Result<(JsonValue, Option<StateDump>)> {
        match self {
            Response::Err { err } => Err(SandboxError::Execution(op.failure(err))),
            Response::Ok { state, mem } => match (op, mem) {
                (Operation::Query, None) => Ok((state, None)),
                (Operation::Query, Some(_)) | (_, None) => {
                    Err(ProtocolViolation::UnexpectedResponse(op.to_string()).into())
                }
                (_, Some(mem)) => Ok((state, Some(mem.state_dump))),
            },
        }
    }
}

/// A key/value attribute emitted by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An event emitted by a module, e.g. `consume`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl ModuleEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    pub fn attribute_map(&self) -> BTreeMap<String, String> {
        attributes_to_map(&self.attributes)
    }
}

/// What a module returns from a state-changing call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleResponse {
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ModuleEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ModuleResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    pub fn add_event(mut self, event: ModuleEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Collapse an attribute list into a map; later keys win.
pub fn attributes_to_map(attributes: &[Attribute]) -> BTreeMap<String, String> {
    attributes
        .iter()
        .map(|a| (a.key.clone(), a.value.clone()))
        .collect()
}

/// Result of a successful state-changing call, as seen by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Module-defined attributes.
    pub state: BTreeMap<String, String>,
    pub events: Vec<ModuleEvent>,
    pub data: Option<String>,
    /// The instance's new memory.
    pub mem: StateDump,
}

impl Outcome {
    pub(crate) fn from_response(response: ModuleResponse, mem: StateDump) -> Self {
        Self {
            state: attributes_to_map(&response.attributes),
            events: response.events,
            data: response.data,
            mem,
        }
    }

    /// First emitted event of the given type.
    pub fn event(&self, kind: &str) -> Option<&ModuleEvent> {
        self.events.iter().find(|e| e.kind == kind)
    }
}
