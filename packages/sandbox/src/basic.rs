//! A reference ownable: transferable, lockable and consumable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::memory::Memory;
use crate::module::{ModuleError, ModuleResult, Ownable};
use crate::protocol::{MessageInfo, ModuleEvent, ModuleResponse};

/// Bytecode the in-process worker recognises as [`BasicOwnable`].
pub const BASIC_BYTECODE: &[u8] = b"ownables:basic-ownable";

const CONFIG_KEY: &str = "config";
const CONSUMED_KEY: &str = "consumed";

/// Persistent configuration of a basic ownable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub owner: String,
    pub issuer: String,
    pub ownable_id: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub network_id: String,
    /// Package type this ownable accepts in consume events, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumes: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub consumed: bool,
}

#[derive(Debug, Deserialize)]
struct InstantiateMsg {
    ownable_id: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    network_id: String,
    #[serde(default)]
    consumes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExecuteMsg {
    Transfer { to: String },
    Lock {},
    Consume {},
}

#[derive(Debug, Deserialize)]
struct ExternalEventMsg {
    msg: ExternalEvent,
}

#[derive(Debug, Deserialize)]
struct ExternalEvent {
    event_type: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum QueryMsg {
    GetInfo {},
    GetMetadata {},
    GetWidgetState {},
    IsLocked {},
    IsConsumerOf { consumable_type: String },
}

fn parse<T: serde::de::DeserializeOwned>(msg: &JsonValue) -> ModuleResult<T> {
    serde_json::from_value(msg.clone()).map_err(|e| ModuleError::InvalidMessage(e.to_string()))
}

fn load_config(memory: &Memory) -> ModuleResult<Config> {
    match memory.load(CONFIG_KEY) {
        Some(config) => Ok(config?),
        None => Err(ModuleError::NotInstantiated),
    }
}

fn load_consumed(memory: &Memory) -> ModuleResult<Vec<String>> {
    Ok(memory.load(CONSUMED_KEY).transpose()?.unwrap_or_default())
}

/// The built-in ownable.
///
/// - `transfer {to}`: owner only, not while locked
/// - `lock {}`: owner only
/// - `consume {}`: owner only; emits a `consume` event for the consumer
/// - external `consume` events: accepted from the same owner
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicOwnable;

impl BasicOwnable {
    fn transfer(
        &self,
        memory: &mut Memory,
        mut config: Config,
        to: String,
    ) -> ModuleResult<ModuleResponse> {
        if config.locked {
            return Err(ModuleError::custom("Ownable is locked"));
        }
        if to.trim().is_empty() || to == config.owner {
            return Err(ModuleError::custom("invalid transfer target"));
        }
        config.owner = to;
        memory.save(CONFIG_KEY, &config)?;
        Ok(ModuleResponse::new()
            .add_attribute("method", "transfer")
            .add_attribute("new_owner", config.owner))
    }

    fn lock(&self, memory: &mut Memory, mut config: Config) -> ModuleResult<ModuleResponse> {
        if config.locked {
            return Err(ModuleError::custom("Ownable is already locked"));
        }
        config.locked = true;
        memory.save(CONFIG_KEY, &config)?;
        Ok(ModuleResponse::new()
            .add_attribute("method", "lock")
            .add_attribute("is_locked", "true"))
    }

    fn consume(&self, memory: &mut Memory, mut config: Config) -> ModuleResult<ModuleResponse> {
        if config.consumed {
            return Err(ModuleError::custom("Ownable is already consumed"));
        }
        if config.locked {
            return Err(ModuleError::custom("Ownable is locked"));
        }
        config.consumed = true;
        memory.save(CONFIG_KEY, &config)?;

        let event = ModuleEvent::new("consume")
            .add_attribute("owner", config.owner.clone())
            .add_attribute("issuer", config.issuer.clone())
            .add_attribute("ownable_id", config.ownable_id.clone())
            .add_attribute("ownable_type", config.package.clone());
        Ok(ModuleResponse::new()
            .add_attribute("method", "consume")
            .add_event(event))
    }

    fn accepts(config: &Config, consumable_type: &str) -> bool {
        config
            .consumes
            .as_deref()
            .map_or(true, |accepted| accepted == consumable_type)
    }
}

impl Ownable for BasicOwnable {
    fn instantiate(
        &self,
        memory: &mut Memory,
        msg: &JsonValue,
        info: &MessageInfo,
    ) -> ModuleResult<ModuleResponse> {
        let msg: InstantiateMsg = parse(msg)?;
        let config = Config {
            owner: info.sender.clone(),
            issuer: info.sender.clone(),
            ownable_id: msg.ownable_id,
            package: msg.package,
            network_id: msg.network_id,
            consumes: msg.consumes,
            locked: false,
            consumed: false,
        };
        memory.save(CONFIG_KEY, &config)?;
        memory.save(CONSUMED_KEY, &Vec::<String>::new())?;

        Ok(ModuleResponse::new()
            .add_attribute("method", "instantiate")
            .add_attribute("owner", config.owner.clone())
            .add_attribute("issuer", config.issuer))
    }

    fn execute(
        &self,
        memory: &mut Memory,
        msg: &JsonValue,
        info: &MessageInfo,
    ) -> ModuleResult<ModuleResponse> {
        let config = load_config(memory)?;
        if info.sender != config.owner {
            return Err(ModuleError::Unauthorized);
        }
        match parse(msg)? {
            ExecuteMsg::Transfer { to } => self.transfer(memory, config, to),
            ExecuteMsg::Lock {} => self.lock(memory, config),
            ExecuteMsg::Consume {} => self.consume(memory, config),
        }
    }

    fn external_event(
        &self,
        memory: &mut Memory,
        msg: &JsonValue,
        _info: &MessageInfo,
    ) -> ModuleResult<ModuleResponse> {
        let config = load_config(memory)?;
        let ExternalEventMsg { msg: event } = parse(msg)?;

        if event.event_type != "consume" {
            return Err(ModuleError::custom(format!(
                "unsupported external event {}",
                event.event_type
            )));
        }

        let attr = |key: &str| event.attributes.get(key).cloned().unwrap_or_default();
        if attr("owner") != config.owner {
            return Err(ModuleError::Unauthorized);
        }
        let consumable_type = attr("ownable_type");
        if !Self::accepts(&config, &consumable_type) {
            return Err(ModuleError::custom(format!(
                "cannot consume ownables of type {}",
                consumable_type
            )));
        }

        let mut consumed = load_consumed(memory)?;
        let ownable_id = attr("ownable_id");
        if consumed.contains(&ownable_id) {
            return Err(ModuleError::custom("Ownable is already consumed"));
        }
        consumed.push(ownable_id.clone());
        memory.save(CONSUMED_KEY, &consumed)?;

        Ok(ModuleResponse::new()
            .add_attribute("method", "register_external_event")
            .add_attribute("event_type", event.event_type)
            .add_attribute("consumed", ownable_id))
    }

    fn query(&self, memory: &Memory, msg: &JsonValue) -> ModuleResult<JsonValue> {
        let config = load_config(memory)?;
        let answer = match parse(msg)? {
            QueryMsg::GetInfo {} => serde_json::to_value(&config)?,
            QueryMsg::GetMetadata {} => json!({
                "name": format!("Ownable {}", config.ownable_id),
                "description": "Basic ownable",
                "package": config.package,
            }),
            QueryMsg::GetWidgetState {} => json!({
                "locked": config.locked,
                "consumed": config.consumed,
                "consumed_count": load_consumed(memory)?.len(),
            }),
            QueryMsg::IsLocked {} => json!(config.locked),
            QueryMsg::IsConsumerOf { consumable_type } => {
                json!(Self::accepts(&config, &consumable_type))
            }
        };
        Ok(answer)
    }
}
