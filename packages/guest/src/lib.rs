//! The basic ownable, built as a Wasm component.
//!
//! Behaves like the host's built-in `BasicOwnable`: transferable, lockable
//! and consumable. State lives in the host-provided key/value memory as JSON.
//!
//! Build with `cargo component build -p ownables-guest --release`; the
//! resulting `.wasm` goes into a package as `ownable_bg.wasm`.

wit_bindgen::generate!({
    world: "ownable-world",
    path: "../sandbox/wit/ownable.wit",
});

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use exports::ownables::module::ownable::Guest;
use ownables::module::memory;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

const CONFIG_KEY: &str = "config";
const CONSUMED_KEY: &str = "consumed";

type Result<T> = std::result::Result<T, String>;

fn custom(val: &str) -> String {
    format!("Custom Error val: {:?}", val)
}

fn unauthorized() -> String {
    "Unauthorized".to_string()
}

#[derive(Serialize, Deserialize)]
struct Config {
    owner: String,
    issuer: String,
    ownable_id: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    consumes: Option<String>,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    consumed: bool,
}

#[derive(Deserialize)]
struct Info {
    sender: String,
}

#[derive(Deserialize)]
struct InstantiateMsg {
    ownable_id: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    network_id: String,
    #[serde(default)]
    consumes: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExecuteMsg {
    Transfer { to: String },
    Lock {},
    Consume {},
}

#[derive(Deserialize)]
struct ExternalEventMsg {
    msg: ExternalEvent,
}

#[derive(Deserialize)]
struct ExternalEvent {
    event_type: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum QueryMsg {
    GetInfo {},
    GetMetadata {},
    GetWidgetState {},
    IsLocked {},
    IsConsumerOf { consumable_type: String },
}

fn parse<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| format!("invalid message: {}", e))
}

fn load<T: DeserializeOwned>(key: &str) -> Result<Option<T>> {
    memory::get(key.as_bytes())
        .map(|bytes| serde_json::from_slice(&bytes))
        .transpose()
        .map_err(|e| format!("storage error: {}", e))
}

fn save<T: Serialize>(key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| format!("storage error: {}", e))?;
    memory::set(key.as_bytes(), &bytes);
    Ok(())
}

fn config() -> Result<Config> {
    load(CONFIG_KEY)?.ok_or_else(|| "not instantiated".to_string())
}

fn consumed() -> Result<Vec<String>> {
    Ok(load(CONSUMED_KEY)?.unwrap_or_default())
}

fn accepts(config: &Config, consumable_type: &str) -> bool {
    config
        .consumes
        .as_deref()
        .map_or(true, |accepted| accepted == consumable_type)
}

fn attributes(pairs: &[(&str, &str)]) -> JsonValue {
    pairs
        .iter()
        .map(|(key, value)| json!({"key": key, "value": value}))
        .collect()
}

fn response(pairs: &[(&str, &str)]) -> Result<String> {
    Ok(json!({ "attributes": attributes(pairs) }).to_string())
}

struct BasicOwnable;

impl Guest for BasicOwnable {
    fn instantiate(msg: String, info: String) -> Result<String> {
        let msg: InstantiateMsg = parse(&msg)?;
        let info: Info = parse(&info)?;
        let config = Config {
            owner: info.sender.clone(),
            issuer: info.sender,
            ownable_id: msg.ownable_id,
            package: msg.package,
            network_id: msg.network_id,
            consumes: msg.consumes,
            locked: false,
            consumed: false,
        };
        save(CONFIG_KEY, &config)?;
        save(CONSUMED_KEY, &Vec::<String>::new())?;
        response(&[
            ("method", "instantiate"),
            ("owner", &config.owner),
            ("issuer", &config.issuer),
        ])
    }

    fn execute(msg: String, info: String) -> Result<String> {
        let mut config = config()?;
        let info: Info = parse(&info)?;
        if info.sender != config.owner {
            return Err(unauthorized());
        }

        match parse(&msg)? {
            ExecuteMsg::Transfer { to } => {
                if config.locked {
                    return Err(custom("Ownable is locked"));
                }
                if to.trim().is_empty() || to == config.owner {
                    return Err(custom("invalid transfer target"));
                }
                config.owner = to;
                save(CONFIG_KEY, &config)?;
                response(&[("method", "transfer"), ("new_owner", &config.owner)])
            }
            ExecuteMsg::Lock {} => {
                if config.locked {
                    return Err(custom("Ownable is already locked"));
                }
                config.locked = true;
                save(CONFIG_KEY, &config)?;
                response(&[("method", "lock"), ("is_locked", "true")])
            }
            ExecuteMsg::Consume {} => {
                if config.consumed {
                    return Err(custom("Ownable is already consumed"));
                }
                if config.locked {
                    return Err(custom("Ownable is locked"));
                }
                config.consumed = true;
                save(CONFIG_KEY, &config)?;
                let event = json!({
                    "type": "consume",
                    "attributes": attributes(&[
                        ("owner", &config.owner),
                        ("issuer", &config.issuer),
                        ("ownable_id", &config.ownable_id),
                        ("ownable_type", &config.package),
                    ]),
                });
                Ok(json!({
                    "attributes": attributes(&[("method", "consume")]),
                    "events": [event],
                })
                .to_string())
            }
        }
    }

    fn external_event(msg: String, _info: String) -> Result<String> {
        let config = config()?;
        let ExternalEventMsg { msg: event } = parse(&msg)?;
        if event.event_type != "consume" {
            return Err(custom(&format!(
                "unsupported external event {}",
                event.event_type
            )));
        }

        let attr = |key: &str| event.attributes.get(key).cloned().unwrap_or_default();
        if attr("owner") != config.owner {
            return Err(unauthorized());
        }
        let consumable_type = attr("ownable_type");
        if !accepts(&config, &consumable_type) {
            return Err(custom(&format!(
                "cannot consume ownables of type {}",
                consumable_type
            )));
        }

        let mut consumed = consumed()?;
        let ownable_id = attr("ownable_id");
        if consumed.contains(&ownable_id) {
            return Err(custom("Ownable is already consumed"));
        }
        consumed.push(ownable_id.clone());
        save(CONSUMED_KEY, &consumed)?;

        response(&[
            ("method", "register_external_event"),
            ("event_type", &event.event_type),
            ("consumed", &ownable_id),
        ])
    }

    fn query(msg: String) -> Result<String> {
        let config = config()?;
        let answer = match parse(&msg)? {
            QueryMsg::GetInfo {} => {
                serde_json::to_value(&config).map_err(|e| format!("storage error: {}", e))?
            }
            QueryMsg::GetMetadata {} => json!({
                "name": format!("Ownable {}", config.ownable_id),
                "description": "Basic ownable",
                "package": config.package,
            }),
            QueryMsg::GetWidgetState {} => json!({
                "locked": config.locked,
                "consumed": config.consumed,
                "consumed_count": consumed()?.len(),
            }),
            QueryMsg::IsLocked {} => json!(config.locked),
            QueryMsg::IsConsumerOf { consumable_type } => json!(accepts(&config, &consumable_type)),
        };
        Ok(BASE64.encode(answer.to_string()))
    }
}

export!(BasicOwnable);
