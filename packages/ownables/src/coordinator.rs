//! The chain persistence coordinator.
//!
//! Every state-changing call follows the same sequence, under a per-instance
//! lock:
//!
//! 1. load the chain record and state dump
//! 2. run the operation in the instance's sandbox
//! 3. on success, sign and append one event describing the message
//! 4. write the dump, then the chain, then the applied-hash
//! 5. anchor events past the anchoring checkpoint, if enabled
//!
//! A failed call changes nothing: no event, no dump.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use ownables_anchoring::{Anchorer, HttpLedger, LedgerClient, Verification};
use ownables_event_chain::{Anchor, Event, EventChain, CONTEXT_KEY};
use ownables_sandbox::{
    ExecutionError, Frame, FrameConfig, FrameHandle, MessageInfo, Outcome, SandboxError,
    SessionState,
};
use ownables_state_store::{ChainRecord, DiskStore, StateDump, Store};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::launcher::{Launcher, WorkerLauncher};
use crate::package::{self, DirectoryResolver, PackageResolver};
use crate::session::Session;

/// `@context` of the genesis event.
pub const INSTANTIATE_CONTEXT: &str = "instantiate_msg.json";
/// `@context` of events recording an `execute` message.
pub const EXECUTE_CONTEXT: &str = "execute_msg.json";
/// `@context` of events recording an external event.
pub const EXTERNAL_EVENT_CONTEXT: &str = "external_event_msg.json";

const RETRY_BACKOFF: Duration = Duration::from_millis(20);

type SandboxResult<T> = std::result::Result<T, SandboxError>;

#[derive(Default)]
struct Instance {
    frame: Option<FrameHandle>,
}

/// A newly created instance.
#[derive(Debug, Clone)]
pub struct Created {
    pub id: String,
    pub outcome: Outcome,
}

/// Result of [`Coordinator::verify`].
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub id: String,
    pub events: usize,
    pub partial: bool,
    /// Ledger status per event, when a ledger is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchors: Option<Vec<Verification>>,
}

/// Runs operations on ownable instances and keeps their chains.
pub struct Coordinator {
    session: Session,
    store: Arc<dyn Store>,
    packages: Arc<dyn PackageResolver>,
    launcher: Arc<dyn Launcher>,
    anchorer: Option<Anchorer<Arc<dyn LedgerClient>>>,
    frame_config: FrameConfig,
    storage_retries: u32,
    instances: StdMutex<HashMap<String, Arc<Mutex<Instance>>>>,
}

impl Coordinator {
    /// A coordinator running native modules, without a ledger.
    pub fn new(
        session: Session,
        store: Arc<dyn Store>,
        packages: Arc<dyn PackageResolver>,
    ) -> Self {
        Self {
            session,
            store,
            packages,
            launcher: Arc::new(WorkerLauncher::default()),
            anchorer: None,
            frame_config: FrameConfig::default(),
            storage_retries: 3,
            instances: StdMutex::new(HashMap::new()),
        }
    }

    /// Build from configuration: disk store and packages under `data_dir`,
    /// HTTP ledger when `ledger_url` is set.
    pub fn from_config(config: &Config, session: Session) -> Result<Self> {
        let store = DiskStore::open(config.instances_dir())?;
        let packages = DirectoryResolver::new(config.packages_dir());
        let session = session
            .with_network_id(config.network_id.clone())
            .with_anchoring(config.anchoring);

        let mut coordinator = Self::new(session, Arc::new(store), Arc::new(packages))
            .with_frame_config(FrameConfig {
                origin: config.origin.clone(),
                call_timeout: config.call_timeout(),
            })
            .with_storage_retries(config.storage_retries);

        if let Some(url) = &config.ledger_url {
            let ledger = HttpLedger::new(url.as_str())?;
            coordinator = coordinator.with_ledger(Arc::new(ledger));
        }
        Ok(coordinator)
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.anchorer = Some(Anchorer::new(ledger));
        self
    }

    pub fn with_frame_config(mut self, frame_config: FrameConfig) -> Self {
        self.frame_config = frame_config;
        self
    }

    pub fn with_storage_retries(mut self, retries: u32) -> Self {
        self.storage_retries = retries;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn packages(&self) -> &dyn PackageResolver {
        self.packages.as_ref()
    }

    /// Create an instance of `package_id` with a fresh chain.
    pub async fn create(&self, package_id: &str) -> Result<Created> {
        self.create_with(package_id, json!({})).await
    }

    /// Like [`Coordinator::create`], with extra instantiate message fields.
    pub async fn create_with(&self, package_id: &str, extra: JsonValue) -> Result<Created> {
        let JsonValue::Object(mut msg) = extra else {
            return Err(Error::InvalidMessage(
                "instantiate fields must be a JSON object".to_string(),
            ));
        };

        let mut chain = EventChain::create(self.session.signer());
        let id = chain.id().to_hex();
        msg.insert("ownable_id".to_string(), json!(id));
        msg.insert("package".to_string(), json!(package_id));
        msg.insert("network_id".to_string(), json!(self.session.network_id()));
        let msg = JsonValue::Object(msg);

        let lock = self.instance(&id);
        let mut instance = lock.lock().await;

        let event = chain_event(INSTANTIATE_CONTEXT, &msg)?;
        let outcome = match self
            .instantiate(&mut instance, &id, package_id, msg)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard(&mut instance, &id).await;
                return Err(e);
            }
        };

        chain.add(event, self.session.signer())?;
        let mut record = ChainRecord::new(chain, package_id);
        if let Err(e) = self.commit(&id, &mut record, &outcome.mem).await {
            self.discard(&mut instance, &id).await;
            return Err(e);
        }

        info!(ownable_id = %id, package = %package_id, "instance created");
        Ok(Created { id, outcome })
    }

    async fn instantiate(
        &self,
        instance: &mut Instance,
        id: &str,
        package_id: &str,
        msg: JsonValue,
    ) -> Result<Outcome> {
        let frame = self.frame(instance, id, package_id).await?;
        let result = frame.instantiate(msg, self.session.message_info()).await;
        self.checked(instance, id, result).await
    }

    /// Run an `execute` message and record it.
    pub async fn execute(&self, id: &str, msg: JsonValue) -> Result<Outcome> {
        let event = chain_event(EXECUTE_CONTEXT, &msg)?;
        let lock = self.instance(id);
        let mut instance = lock.lock().await;

        let mut record = self.load_record(id).await?;
        let mem = self.load_dump(id).await?;
        let frame = self.frame(&mut instance, id, &record.package).await?;

        let result = frame.execute(msg, self.session.message_info(), mem).await;
        let outcome = self.checked(&mut instance, id, result).await?;

        let mut chain = record.chain.clone();
        chain.add(event, self.session.signer())?;
        record.set_chain(chain);
        self.commit(id, &mut record, &outcome.mem).await?;
        Ok(outcome)
    }

    /// Run a read-only query.
    pub async fn query(&self, id: &str, msg: JsonValue) -> Result<JsonValue> {
        let lock = self.instance(id);
        let mut instance = lock.lock().await;

        let record = self.load_record(id).await?;
        let mem = self.load_dump(id).await?;
        let frame = self.frame(&mut instance, id, &record.package).await?;

        let result = frame.query(msg, mem).await;
        self.checked(&mut instance, id, result).await
    }

    /// Query the widget state and publish it to the sandbox's subscribers.
    pub async fn refresh(&self, id: &str) -> Result<JsonValue> {
        let lock = self.instance(id);
        let mut instance = lock.lock().await;

        let record = self.load_record(id).await?;
        let mem = self.load_dump(id).await?;
        let frame = self.frame(&mut instance, id, &record.package).await?;

        let result = frame.refresh(mem).await;
        self.checked(&mut instance, id, result).await
    }

    /// Let `consumer_id` consume `consumable_id`.
    ///
    /// The consumable runs `consume {}`; its `consume` event is delivered to
    /// the consumer as an external event. Both chains are written only after
    /// both calls succeed.
    pub async fn consume(&self, consumer_id: &str, consumable_id: &str) -> Result<()> {
        if consumer_id == consumable_id {
            return Err(Error::InvalidMessage(
                "an ownable cannot consume itself".to_string(),
            ));
        }

        let consumer_lock = self.instance(consumer_id);
        let consumable_lock = self.instance(consumable_id);
        // Lock in id order so concurrent consumes cannot deadlock.
        let (mut consumer, mut consumable) = if consumer_id < consumable_id {
            let consumer = consumer_lock.lock().await;
            (consumer, consumable_lock.lock().await)
        } else {
            let consumable = consumable_lock.lock().await;
            (consumer_lock.lock().await, consumable)
        };

        let mut consumer_record = self.load_record(consumer_id).await?;
        let mut consumable_record = self.load_record(consumable_id).await?;
        let consumer_mem = self.load_dump(consumer_id).await?;
        let consumable_mem = self.load_dump(consumable_id).await?;
        let consumer_before_mem = consumer_mem.clone();
        let consumable_before_mem = consumable_mem.clone();

        let consumer_frame = self
            .frame(&mut consumer, consumer_id, &consumer_record.package)
            .await?;
        let consumable_frame = self
            .frame(&mut consumable, consumable_id, &consumable_record.package)
            .await?;

        let result = consumable_frame
            .query(json!({"get_info": {}}), consumable_mem.clone())
            .await;
        let info = self.checked(&mut consumable, consumable_id, result).await?;
        let issuer = info.get("issuer").cloned().unwrap_or(JsonValue::Null);

        let can_consume = json!({
            "is_consumer_of": {
                "consumable_type": consumable_record.package,
                "issuer": issuer,
            }
        });
        let result = consumer_frame.query(can_consume, consumer_mem.clone()).await;
        if self.checked(&mut consumer, consumer_id, result).await? != JsonValue::Bool(true) {
            return Err(ExecutionError::Failed(format!(
                "{} cannot consume ownables of package {}",
                consumer_id, consumable_record.package
            ))
            .into());
        }

        let consume_msg = json!({"consume": {}});
        let consume_event = chain_event(EXECUTE_CONTEXT, &consume_msg)?;
        let result = consumable_frame
            .execute(consume_msg, self.session.message_info(), consumable_mem)
            .await;
        let consumed = self.checked(&mut consumable, consumable_id, result).await?;

        let event = consumed.event("consume").ok_or_else(|| {
            ExecutionError::Failed(format!("{} emitted no consume event", consumable_id))
        })?;
        let external_msg = json!({
            "msg": {
                "event_type": event.kind,
                "attributes": event.attribute_map(),
                "network": self.session.network_id(),
            }
        });
        let external_event = chain_event(EXTERNAL_EVENT_CONTEXT, &external_msg)?;
        let result = consumer_frame
            .external_event(external_msg, self.session.message_info(), consumer_mem)
            .await;
        let applied = self.checked(&mut consumer, consumer_id, result).await?;

        let consumable_before = consumable_record.clone();
        let mut chain = consumable_record.chain.clone();
        chain.add(consume_event, self.session.signer())?;
        consumable_record.set_chain(chain);

        let consumer_before = consumer_record.clone();
        let mut chain = consumer_record.chain.clone();
        chain.add(external_event, self.session.signer())?;
        consumer_record.set_chain(chain);

        self.write_all(&[
            Write {
                id: consumable_id,
                record: &consumable_record,
                dump: &consumed.mem,
                record_before: &consumable_before,
                dump_before: &consumable_before_mem,
            },
            Write {
                id: consumer_id,
                record: &consumer_record,
                dump: &applied.mem,
                record_before: &consumer_before,
                dump_before: &consumer_before_mem,
            },
        ])
        .await?;
        self.finish(consumable_id, &mut consumable_record).await?;
        self.finish(consumer_id, &mut consumer_record).await?;

        info!(consumer = %consumer_id, consumable = %consumable_id, "ownable consumed");
        Ok(())
    }

    /// Take over a complete chain created elsewhere, replaying every event.
    ///
    /// A chain that is already known is extended instead.
    pub async fn import(&self, chain: EventChain, package_id: &str) -> Result<String> {
        if chain.is_empty() {
            return Err(Error::InvalidMessage("cannot import an empty chain".to_string()));
        }
        chain.validate()?;
        let id = chain.id().to_hex();

        let lock = self.instance(&id);
        let mut instance = lock.lock().await;

        if self.retry("load_chain", &id, || self.store.load_chain(&id)).await?.is_some() {
            drop(instance);
            self.receive(&id, &chain).await?;
            return Ok(id);
        }

        let mem = match self.replay_all(&mut instance, &id, package_id, &chain).await {
            Ok(mem) => mem,
            Err(e) => {
                self.discard(&mut instance, &id).await;
                return Err(e);
            }
        };

        let mut record = ChainRecord::new(chain, package_id);
        self.commit(&id, &mut record, &mem).await?;
        info!(ownable_id = %id, events = record.chain.len(), "chain imported");
        Ok(id)
    }

    async fn replay_all(
        &self,
        instance: &mut Instance,
        id: &str,
        package_id: &str,
        chain: &EventChain,
    ) -> Result<StateDump> {
        let frame = self.frame(instance, id, package_id).await?;
        self.replay(instance, id, &frame, chain.events(), StateDump::default())
            .await
    }

    /// Extend a known instance with events from a third party.
    ///
    /// Only events past the last applied one are replayed. Returns how many
    /// events were added.
    pub async fn receive(&self, id: &str, partial: &EventChain) -> Result<usize> {
        let lock = self.instance(id);
        let mut instance = lock.lock().await;

        let mut record = self.load_record(id).await?;
        let mut chain = record.chain.clone();
        let added = chain.extend(partial)?;
        if added == 0 {
            return Ok(0);
        }

        let applied = self
            .retry("applied", id, || self.store.applied(id))
            .await?
            .unwrap_or(record.latest_hash);
        let start = chain
            .events()
            .iter()
            .position(|e| e.hash == Some(applied))
            .map_or(0, |i| i + 1);
        let unapplied = chain
            .events()
            .get(start)
            .and_then(|e| e.hash)
            .map(|first| chain.starting_with(&first));

        let mut mem = self.load_dump(id).await?;
        if let Some(unapplied) = unapplied {
            let frame = self.frame(&mut instance, id, &record.package).await?;
            mem = self
                .replay(&mut instance, id, &frame, unapplied.events(), mem)
                .await?;
        }

        record.set_chain(chain);
        self.commit(id, &mut record, &mem).await?;
        info!(ownable_id = %id, added, "events received");
        Ok(added)
    }

    /// Check a stored chain and, with a ledger, its anchors.
    pub async fn verify(&self, id: &str) -> Result<VerifyReport> {
        let record = self.load_record(id).await?;
        if record.chain.is_partial() {
            record.chain.validate_links()?;
        } else {
            record.chain.validate()?;
        }

        let anchors = match &self.anchorer {
            Some(anchorer) => Some(anchorer.verify(&record.chain.anchor_map()).await),
            None => None,
        };
        Ok(VerifyReport {
            id: id.to_string(),
            events: record.chain.len(),
            partial: record.chain.is_partial(),
            anchors,
        })
    }

    /// Remove an instance: its sandbox, chain and state dump.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let lock = self.instance(id);
        let mut instance = lock.lock().await;

        if self.retry("load_chain", id, || self.store.load_chain(id)).await?.is_none() {
            return Err(Error::UnknownInstance(id.to_string()));
        }
        if let Some(frame) = instance.frame.take() {
            frame.shutdown().await;
        }
        // Chain first: a dump without a chain is unreachable, not inconsistent.
        self.retry("delete_chain", id, || self.store.delete(id)).await?;
        self.retry("remove_dump", id, || self.store.remove(id)).await?;
        if let Some(anchorer) = &self.anchorer {
            anchorer.discard(id).await;
        }

        drop(instance);
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        info!(ownable_id = %id, "instance deleted");
        Ok(())
    }

    /// Ids of all stored instances.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.retry("list", "-", || self.store.list()).await
    }

    /// The stored chain record of an instance.
    pub async fn record(&self, id: &str) -> Result<ChainRecord> {
        self.load_record(id).await
    }

    /// Retry anchors deferred by earlier failures.
    ///
    /// Each instance's anchors are delivered under its lock and move its
    /// anchoring checkpoint forward. Returns how many anchors were delivered;
    /// fails only if something was pending and nothing got through.
    pub async fn flush_anchors(&self) -> Result<usize> {
        let Some(anchorer) = &self.anchorer else {
            return Ok(0);
        };

        let mut delivered = 0;
        let mut failure = None;
        for id in anchorer.sources().await {
            let lock = self.instance(&id);
            let _instance = lock.lock().await;
            match anchorer.deliver(&id).await {
                Ok(anchors) => {
                    delivered += anchors.len();
                    self.record_delivery(&id, &anchors).await;
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) if delivered == 0 => Err(e.into()),
            _ => Ok(delivered),
        }
    }

    /// Stop every running sandbox.
    pub async fn shutdown(&self) {
        let instances: Vec<_> = self
            .instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (id, lock) in instances {
            if let Some(frame) = lock.lock().await.frame.take() {
                debug!(ownable_id = %id, "stopping sandbox");
                frame.shutdown().await;
            }
        }
    }

    fn instance(&self, id: &str) -> Arc<Mutex<Instance>> {
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the sandbox and registry entry of an instance that was never stored.
    async fn discard(&self, instance: &mut Instance, id: &str) {
        if let Some(frame) = instance.frame.take() {
            frame.shutdown().await;
        }
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// The instance's running sandbox, started on first use.
    async fn frame(
        &self,
        instance: &mut Instance,
        id: &str,
        package_id: &str,
    ) -> Result<FrameHandle> {
        if let Some(frame) = &instance.frame {
            if frame.state() != SessionState::Closed {
                return Ok(frame.clone());
            }
        }

        let boot = package::bootstrap(self.packages.as_ref(), package_id)?;
        let frame = Frame::spawn(self.launcher.launch(), self.frame_config.clone());
        if let Err(e) = frame.init(id, boot.bytecode).await {
            frame.shutdown().await;
            return Err(e.into());
        }

        debug!(ownable_id = %id, package = %package_id, "sandbox started");
        instance.frame = Some(frame.clone());
        Ok(frame)
    }

    /// Convert a sandbox result, tearing the sandbox down on fatal errors.
    async fn checked<T>(
        &self,
        instance: &mut Instance,
        id: &str,
        result: SandboxResult<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_fatal() {
                    if let Some(frame) = instance.frame.take() {
                        warn!(ownable_id = %id, error = %e, "tearing down sandbox");
                        frame.shutdown().await;
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Re-run recorded events in order, threading memory through them.
    async fn replay(
        &self,
        instance: &mut Instance,
        id: &str,
        frame: &FrameHandle,
        events: &[Event],
        mut mem: StateDump,
    ) -> Result<StateDump> {
        for event in events {
            let (context, msg, info) = replay_message(event)?;
            let result = match context.as_str() {
                INSTANTIATE_CONTEXT => frame.instantiate(msg, info).await,
                EXECUTE_CONTEXT => frame.execute(msg, info, mem).await,
                EXTERNAL_EVENT_CONTEXT => frame.external_event(msg, info, mem).await,
                other => {
                    return Err(Error::InvalidMessage(format!(
                        "unknown event context {:?}",
                        other
                    )))
                }
            };
            mem = self.checked(instance, id, result).await?.mem;
        }
        debug!(ownable_id = %id, events = events.len(), "events replayed");
        Ok(mem)
    }

    async fn load_record(&self, id: &str) -> Result<ChainRecord> {
        self.retry("load_chain", id, || self.store.load_chain(id))
            .await?
            .ok_or_else(|| Error::UnknownInstance(id.to_string()))
    }

    async fn load_dump(&self, id: &str) -> Result<StateDump> {
        Ok(self
            .retry("get_dump", id, || self.store.get(id))
            .await?
            .unwrap_or_default())
    }

    /// Persist the dump, then the chain, then the applied hash; then anchor.
    async fn commit(&self, id: &str, record: &mut ChainRecord, dump: &StateDump) -> Result<()> {
        self.retry("put_dump", id, || self.store.put(id, dump)).await?;
        self.retry("save_chain", id, || self.store.save_chain(id, record))
            .await?;
        self.finish(id, record).await
    }

    /// Write every dump, then every chain. On failure, whatever was already
    /// written is put back.
    async fn write_all(&self, writes: &[Write<'_>]) -> Result<()> {
        for (i, w) in writes.iter().enumerate() {
            if let Err(e) = self.retry("put_dump", w.id, || self.store.put(w.id, w.dump)).await {
                self.restore(&writes[..i], false);
                return Err(e);
            }
        }
        for (i, w) in writes.iter().enumerate() {
            let saved = self
                .retry("save_chain", w.id, || self.store.save_chain(w.id, w.record))
                .await;
            if let Err(e) = saved {
                self.restore(&writes[..i], true);
                self.restore(&writes[i..], false);
                return Err(e);
            }
        }
        Ok(())
    }

    fn restore(&self, writes: &[Write<'_>], chains: bool) {
        for w in writes {
            if chains {
                if let Err(e) = self.store.save_chain(w.id, w.record_before) {
                    warn!(ownable_id = %w.id, error = %e, "could not restore chain");
                }
            }
            if let Err(e) = self.store.put(w.id, w.dump_before) {
                warn!(ownable_id = %w.id, error = %e, "could not restore state dump");
            }
        }
    }

    /// Record the applied hash of a written chain, then anchor it.
    async fn finish(&self, id: &str, record: &mut ChainRecord) -> Result<()> {
        let latest = record.latest_hash;
        self.retry("set_applied", id, || self.store.set_applied(id, &latest))
            .await?;
        info!(ownable_id = %id, events = record.chain.len(), "chain persisted");

        self.anchor(id, record).await;
        Ok(())
    }

    /// Submit anchors past the checkpoint. Failures are deferred, never returned.
    async fn anchor(&self, id: &str, record: &mut ChainRecord) {
        let Some(anchorer) = &self.anchorer else {
            return;
        };
        if !self.session.anchoring() {
            return;
        }

        let checkpoint = record
            .anchored
            .unwrap_or_else(|| record.chain.initial_hash());
        let anchors = record.chain.starting_after(&checkpoint).anchor_map();
        if anchors.is_empty() {
            return;
        }

        match anchorer.submit(id, anchors).await {
            Ok(delivered) => {
                if advance_checkpoint(record, &delivered) {
                    self.save_checkpoint(id, record).await;
                }
                debug!(ownable_id = %id, anchors = delivered.len(), "chain anchored");
            }
            Err(e) => {
                debug!(ownable_id = %id, error = %e, retryable = e.is_retryable(), "chain not anchored");
            }
        }
    }

    /// Move the stored checkpoint past anchors delivered by a flush.
    async fn record_delivery(&self, id: &str, delivered: &[Anchor]) {
        match self.retry("load_chain", id, || self.store.load_chain(id)).await {
            Ok(Some(mut record)) => {
                if advance_checkpoint(&mut record, delivered) {
                    self.save_checkpoint(id, &record).await;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(ownable_id = %id, error = %e, "anchoring checkpoint not loaded"),
        }
    }

    async fn save_checkpoint(&self, id: &str, record: &ChainRecord) {
        let saved = self
            .retry("save_chain", id, || self.store.save_chain(id, record))
            .await;
        if let Err(e) = saved {
            warn!(ownable_id = %id, error = %e, "anchoring checkpoint not saved");
        }
    }

    async fn retry<T, F>(&self, op: &str, id: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> ownables_state_store::Result<T>,
    {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.storage_retries => {
                    attempt += 1;
                    warn!(ownable_id = %id, op, attempt, error = %e, "retrying storage operation");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("session", &self.session)
            .field("anchoring", &self.anchorer.is_some())
            .field("storage_retries", &self.storage_retries)
            .finish_non_exhaustive()
    }
}

/// One instance's share of a multi-instance commit.
struct Write<'a> {
    id: &'a str,
    record: &'a ChainRecord,
    dump: &'a StateDump,
    record_before: &'a ChainRecord,
    dump_before: &'a StateDump,
}

/// Move `record.anchored` to the newest event among `delivered`, if that is
/// past the current checkpoint.
fn advance_checkpoint(record: &mut ChainRecord, delivered: &[Anchor]) -> bool {
    let events = record.chain.events();
    let position = |hash: &ownables_event_chain::Hash| {
        events.iter().position(|e| e.hash.as_ref() == Some(hash))
    };
    let current = record.anchored.as_ref().and_then(|h| position(h));
    let Some(newest) = delivered.iter().filter_map(|a| position(&a.value)).max() else {
        return false;
    };
    if current.is_some_and(|c| newest <= c) {
        return false;
    }
    let hash = events[newest].hash;
    record.anchored = hash;
    true
}

/// An unsigned event recording `msg` under `context`.
fn chain_event(context: &str, msg: &JsonValue) -> Result<Event> {
    let JsonValue::Object(fields) = msg else {
        return Err(Error::InvalidMessage("message must be a JSON object".to_string()));
    };
    let mut data = serde_json::Map::new();
    data.insert(CONTEXT_KEY.to_string(), json!(context));
    data.extend(
        fields
            .iter()
            .filter(|(k, _)| k.as_str() != CONTEXT_KEY)
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    Ok(Event::json(&JsonValue::Object(data))?)
}

/// Split a recorded event back into context, message and sender.
fn replay_message(event: &Event) -> Result<(String, JsonValue, MessageInfo)> {
    let mut data = event.parsed_data()?;
    let context = data
        .as_object_mut()
        .and_then(|fields| fields.remove(CONTEXT_KEY))
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| Error::InvalidMessage("event has no @context".to_string()))?;
    let sender = event.signer().map(|key| key.to_hex()).unwrap_or_default();
    Ok((context, data, MessageInfo::new(sender)))
}
