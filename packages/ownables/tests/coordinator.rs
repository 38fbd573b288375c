use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ownables::{
    Coordinator, Error, Launcher, MemoryResolver, PackageError, PackageResolver, Session,
    WorkerLauncher, BYTECODE_FILE, EXECUTE_CONTEXT, EXTERNAL_EVENT_CONTEXT, INSTANTIATE_CONTEXT,
};
use ownables_anchoring::{AnchorStatus, LedgerClient, MemoryLedger};
use ownables_content_id::PackageFile;
use ownables_event_chain::{Account, Anchor, Hash, Signer};
use ownables_sandbox::{
    Isolate, ModuleRegistry, ProtocolViolation, Request, Response, WorkerIsolate, BASIC_BYTECODE,
};
use ownables_state_store::{
    ChainRecord, ChainStore, DiskStore, MemoryStore, StateDump, StateDumpStore, StoreError,
};
use serde_json::json;

fn package(resolver: &MemoryResolver) -> String {
    resolver
        .import(&[
            PackageFile::new(BYTECODE_FILE, BASIC_BYTECODE),
            PackageFile::new("index.html", b"<div id=\"widget\"></div>".to_vec()),
        ])
        .unwrap()
}

struct Host {
    coordinator: Coordinator,
    store: Arc<MemoryStore>,
    package: String,
    account: Arc<Account>,
}

fn host_with(seed: u8, packages: Arc<MemoryResolver>) -> Host {
    let account = Arc::new(Account::from_seed([seed; 32]));
    let store = Arc::new(MemoryStore::new());
    let package = package(&packages);
    let coordinator = Coordinator::new(Session::new(account.clone()), store.clone(), packages);
    Host {
        coordinator,
        store,
        package,
        account,
    }
}

fn host() -> Host {
    host_with(1, Arc::new(MemoryResolver::new()))
}

#[tokio::test]
async fn genesis_instantiate_creates_one_event() {
    let host = host();
    let created = host.coordinator.create(&host.package).await.unwrap();
    assert_eq!(created.outcome.state["method"], "instantiate");

    let record = host.coordinator.record(&created.id).await.unwrap();
    assert_eq!(record.chain.len(), 1);
    assert_eq!(record.latest_hash, record.chain.events()[0].hash.unwrap());
    assert_eq!(record.package, host.package);
    assert!(record.chain.is_created_by(&host.account.public_key()));
    assert_eq!(
        record.chain.events()[0].context().as_deref(),
        Some(INSTANTIATE_CONTEXT)
    );

    let genesis = record.chain.events()[0].parsed_data().unwrap();
    assert_eq!(genesis["ownable_id"], created.id);
    assert_eq!(genesis["network_id"], "T");

    let dump = host.store.get(&created.id).unwrap().unwrap();
    assert!(!dump.is_empty());
    assert_eq!(dump, created.outcome.mem);
    assert_eq!(
        host.store.applied(&created.id).unwrap(),
        Some(record.latest_hash)
    );
}

#[tokio::test]
async fn rejected_execute_changes_nothing() {
    let host = host();
    let id = host.coordinator.create(&host.package).await.unwrap().id;
    let before = host.store.get(&id).unwrap();
    let record = host.coordinator.record(&id).await.unwrap();

    let err = host
        .coordinator
        .execute(&id, json!({"transfer": {"to": ""}}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Execution(_)));
    assert_eq!(err.to_string(), "invalid transfer target");

    assert_eq!(host.store.get(&id).unwrap(), before);
    assert_eq!(host.coordinator.record(&id).await.unwrap(), record);
}

#[tokio::test]
async fn execute_appends_event_and_persists_memory() {
    let host = host();
    let id = host.coordinator.create(&host.package).await.unwrap().id;

    let outcome = host
        .coordinator
        .execute(&id, json!({"transfer": {"to": "bob"}}))
        .await
        .unwrap();
    assert_eq!(outcome.state["new_owner"], "bob");

    let record = host.coordinator.record(&id).await.unwrap();
    assert_eq!(record.chain.len(), 2);
    assert_eq!(
        record.chain.events()[1].context().as_deref(),
        Some(EXECUTE_CONTEXT)
    );
    assert_eq!(host.store.get(&id).unwrap().unwrap(), outcome.mem);

    let info = host
        .coordinator
        .query(&id, json!({"get_info": {}}))
        .await
        .unwrap();
    assert_eq!(info["owner"], "bob");
}

#[tokio::test]
async fn query_is_idempotent() {
    let host = host();
    let id = host.coordinator.create(&host.package).await.unwrap().id;
    let dump = host.store.get(&id).unwrap();

    let first = host
        .coordinator
        .query(&id, json!({"get_metadata": {}}))
        .await
        .unwrap();
    let second = host
        .coordinator
        .query(&id, json!({"get_metadata": {}}))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(host.store.get(&id).unwrap(), dump);
    assert_eq!(host.coordinator.record(&id).await.unwrap().chain.len(), 1);
}

#[tokio::test]
async fn refresh_returns_widget_state() {
    let host = host();
    let id = host.coordinator.create(&host.package).await.unwrap().id;
    host.coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap();

    let widget = host.coordinator.refresh(&id).await.unwrap();
    assert_eq!(widget["locked"], true);
}

#[tokio::test]
async fn consume_records_both_sides() {
    let host = host();
    let consumer = host.coordinator.create(&host.package).await.unwrap().id;
    let consumable = host.coordinator.create(&host.package).await.unwrap().id;

    host.coordinator
        .consume(&consumer, &consumable)
        .await
        .unwrap();

    let consumable_chain = host.coordinator.record(&consumable).await.unwrap().chain;
    assert_eq!(consumable_chain.len(), 2);
    assert_eq!(
        consumable_chain.events()[1].parsed_data().unwrap()["consume"],
        json!({})
    );

    let consumer_chain = host.coordinator.record(&consumer).await.unwrap().chain;
    assert_eq!(consumer_chain.len(), 2);
    let external = &consumer_chain.events()[1];
    assert_eq!(external.context().as_deref(), Some(EXTERNAL_EVENT_CONTEXT));
    assert_eq!(
        external.parsed_data().unwrap()["msg"]["attributes"]["ownable_id"],
        consumable
    );

    let widget = host.coordinator.refresh(&consumable).await.unwrap();
    assert_eq!(widget["consumed"], true);
    let widget = host.coordinator.refresh(&consumer).await.unwrap();
    assert_eq!(widget["consumed_count"], 1);
}

#[tokio::test]
async fn failed_consume_persists_nothing() {
    let host = host();
    let consumer = host.coordinator.create(&host.package).await.unwrap().id;
    let consumable = host.coordinator.create(&host.package).await.unwrap().id;
    host.coordinator
        .consume(&consumer, &consumable)
        .await
        .unwrap();

    let consumer_dump = host.store.get(&consumer).unwrap();
    let err = host
        .coordinator
        .consume(&consumer, &consumable)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Ownable is already consumed");

    assert_eq!(host.coordinator.record(&consumable).await.unwrap().chain.len(), 2);
    assert_eq!(host.coordinator.record(&consumer).await.unwrap().chain.len(), 2);
    assert_eq!(host.store.get(&consumer).unwrap(), consumer_dump);

    assert!(matches!(
        host.coordinator.consume(&consumer, &consumer).await,
        Err(Error::InvalidMessage(_))
    ));
}

#[tokio::test]
async fn consumer_must_accept_the_package() {
    let host = host();
    let consumer = host
        .coordinator
        .create_with(&host.package, json!({"consumes": "1220ffff"}))
        .await
        .unwrap()
        .id;
    let consumable = host.coordinator.create(&host.package).await.unwrap().id;

    let err = host
        .coordinator
        .consume(&consumer, &consumable)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Execution(_)));
    assert_eq!(host.coordinator.record(&consumable).await.unwrap().chain.len(), 1);
}

#[tokio::test]
async fn import_replays_the_whole_chain() {
    let packages = Arc::new(MemoryResolver::new());
    let alice = host_with(1, packages.clone());
    let bob = host_with(2, packages);

    let id = alice.coordinator.create(&alice.package).await.unwrap().id;
    alice
        .coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap();
    let chain = alice.coordinator.record(&id).await.unwrap().chain;

    let imported = bob
        .coordinator
        .import(chain.clone(), &bob.package)
        .await
        .unwrap();
    assert_eq!(imported, id);
    assert_eq!(bob.coordinator.record(&id).await.unwrap().chain, chain);
    assert_eq!(bob.store.get(&id).unwrap(), alice.store.get(&id).unwrap());

    let info = bob
        .coordinator
        .query(&id, json!({"get_info": {}}))
        .await
        .unwrap();
    assert_eq!(info["owner"], alice.account.address());
    assert_eq!(info["locked"], true);
}

#[tokio::test]
async fn receive_replays_only_new_events() {
    let packages = Arc::new(MemoryResolver::new());
    let alice = host_with(1, packages.clone());
    let bob = host_with(2, packages);

    let id = alice.coordinator.create(&alice.package).await.unwrap().id;
    alice
        .coordinator
        .execute(&id, json!({"transfer": {"to": bob.account.address()}}))
        .await
        .unwrap();
    let handed_over = alice.coordinator.record(&id).await.unwrap().chain;

    bob.coordinator
        .import(handed_over.clone(), &bob.package)
        .await
        .unwrap();
    bob.coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap();

    let bobs = bob.coordinator.record(&id).await.unwrap().chain;
    let partial = bobs.starting_after(&handed_over.latest_hash());
    assert_eq!(partial.len(), 1);

    assert_eq!(alice.coordinator.receive(&id, &partial).await.unwrap(), 1);
    assert_eq!(alice.coordinator.receive(&id, &partial).await.unwrap(), 0);

    let record = alice.coordinator.record(&id).await.unwrap();
    assert_eq!(record.chain, bobs);
    assert_eq!(alice.store.applied(&id).unwrap(), Some(bobs.latest_hash()));

    let locked = alice
        .coordinator
        .query(&id, json!({"is_locked": {}}))
        .await
        .unwrap();
    assert_eq!(locked, json!(true));
}

#[tokio::test]
async fn receive_rejects_foreign_events() {
    let packages = Arc::new(MemoryResolver::new());
    let alice = host_with(1, packages.clone());
    let mallory = host_with(3, packages);

    let id = alice.coordinator.create(&alice.package).await.unwrap().id;
    let other = mallory.coordinator.create(&mallory.package).await.unwrap().id;
    let foreign = mallory.coordinator.record(&other).await.unwrap().chain;

    let err = alice.coordinator.receive(&id, &foreign).await.unwrap_err();
    assert!(matches!(err, Error::ChainIntegrity(_)));
    assert_eq!(alice.coordinator.record(&id).await.unwrap().chain.len(), 1);
}

#[tokio::test]
async fn anchoring_tracks_its_own_checkpoint() {
    let account = Arc::new(Account::from_seed([1; 32]));
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let ledger = Arc::new(MemoryLedger::new());
    let coordinator = Coordinator::new(
        Session::new(account).with_anchoring(true),
        Arc::new(MemoryStore::new()),
        packages,
    )
    .with_ledger(ledger.clone());

    let id = coordinator.create(&package).await.unwrap().id;
    assert_eq!(ledger.len(), 1);

    ledger.set_reachable(false);
    coordinator
        .execute(&id, json!({"transfer": {"to": "bob"}}))
        .await
        .unwrap();
    let record = coordinator.record(&id).await.unwrap();
    assert_eq!(record.chain.len(), 2);
    assert_eq!(record.anchored, Some(record.chain.events()[0].hash.unwrap()));
    assert_eq!(ledger.len(), 1);

    ledger.set_reachable(true);
    coordinator
        .execute(&id, json!({"transfer": {"to": "carol"}}))
        .await
        .unwrap_err();
    // The rejected call (bob owns it now) anchors nothing.
    assert_eq!(ledger.len(), 1);
    assert_eq!(coordinator.flush_anchors().await.unwrap(), 1);
    assert_eq!(ledger.len(), 2);

    let report = coordinator.verify(&id).await.unwrap();
    assert_eq!(report.events, 2);
    let statuses: Vec<_> = report
        .anchors
        .unwrap()
        .into_iter()
        .map(|v| v.status)
        .collect();
    assert_eq!(statuses, vec![AnchorStatus::Verified, AnchorStatus::Verified]);

    let record = coordinator.record(&id).await.unwrap();
    assert_eq!(record.anchored, Some(record.latest_hash));
}

/// Counts every anchor handed to the ledger.
struct CountingLedger {
    inner: MemoryLedger,
    anchors: AtomicUsize,
}

#[async_trait]
impl LedgerClient for CountingLedger {
    async fn anchor(&self, anchors: &[Anchor]) -> ownables_anchoring::Result<()> {
        self.inner.anchor(anchors).await?;
        self.anchors.fetch_add(anchors.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn lookup(&self, key: &Hash) -> ownables_anchoring::Result<Option<Hash>> {
        self.inner.lookup(key).await
    }
}

#[tokio::test]
async fn flushed_anchors_are_not_submitted_again() {
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let ledger = Arc::new(CountingLedger {
        inner: MemoryLedger::new(),
        anchors: AtomicUsize::new(0),
    });
    let coordinator = Coordinator::new(
        Session::new(Arc::new(Account::generate())).with_anchoring(true),
        Arc::new(MemoryStore::new()),
        packages,
    )
    .with_ledger(ledger.clone());

    ledger.inner.set_reachable(false);
    let id = coordinator.create(&package).await.unwrap().id;
    ledger.inner.set_reachable(true);

    assert_eq!(coordinator.flush_anchors().await.unwrap(), 1);
    let record = coordinator.record(&id).await.unwrap();
    assert_eq!(record.anchored, Some(record.latest_hash));

    coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap();
    assert_eq!(coordinator.record(&id).await.unwrap().chain.len(), 2);
    assert_eq!(ledger.anchors.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.flush_anchors().await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_anchors_do_not_hold_back_other_instances() {
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let ledger = Arc::new(MemoryLedger::new());
    let coordinator = Coordinator::new(
        Session::new(Arc::new(Account::generate())).with_anchoring(true),
        Arc::new(MemoryStore::new()),
        packages,
    )
    .with_ledger(ledger.clone());

    ledger.set_reachable(false);
    let forked = coordinator.create(&package).await.unwrap().id;
    let healthy = coordinator.create(&package).await.unwrap().id;
    ledger.set_reachable(true);

    // The ledger already holds a different value for the forked genesis link.
    let genesis = coordinator.record(&forked).await.unwrap().chain.anchor_map()[0];
    ledger
        .anchor(&[Anchor::new(genesis.key, Hash::new([9; 32]))])
        .await
        .unwrap();

    assert_eq!(coordinator.flush_anchors().await.unwrap(), 1);
    assert_eq!(coordinator.flush_anchors().await.unwrap(), 0);

    coordinator
        .execute(&healthy, json!({"lock": {}}))
        .await
        .unwrap();
    let record = coordinator.record(&healthy).await.unwrap();
    assert_eq!(record.anchored, Some(record.latest_hash));
    assert_eq!(ledger.len(), 3);

    let forked_record = coordinator.record(&forked).await.unwrap();
    assert_eq!(forked_record.anchored, None);
    let report = coordinator.verify(&forked).await.unwrap();
    assert_eq!(
        report.anchors.unwrap()[0].status,
        AnchorStatus::Mismatch {
            found: Hash::new([9; 32])
        }
    );
}

#[tokio::test]
async fn anchoring_submits_only_events_past_the_checkpoint() {
    let account = Arc::new(Account::from_seed([1; 32]));
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let ledger = Arc::new(MemoryLedger::new());
    let coordinator = Coordinator::new(
        Session::new(account).with_anchoring(true),
        Arc::new(MemoryStore::new()),
        packages,
    )
    .with_ledger(ledger.clone());

    // Checkpoint at event 1.
    let id = coordinator.create(&package).await.unwrap().id;
    assert_eq!(ledger.submissions(), 1);

    ledger.set_reachable(false);
    coordinator
        .execute(&id, json!({"consume": {}}))
        .await
        .unwrap();
    coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap();

    let record = coordinator.record(&id).await.unwrap();
    let events = record.chain.events();
    assert_eq!(events.len(), 3);
    assert_eq!(record.anchored, events[0].hash);

    ledger.set_reachable(true);
    assert_eq!(coordinator.flush_anchors().await.unwrap(), 2);
    assert_eq!(ledger.submissions(), 2);
    assert_eq!(ledger.len(), 3);

    let report = coordinator.verify(&id).await.unwrap();
    assert!(report
        .anchors
        .unwrap()
        .iter()
        .all(|v| v.status == AnchorStatus::Verified));
}

#[tokio::test]
async fn anchoring_disabled_in_session_submits_nothing() {
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let ledger = Arc::new(MemoryLedger::new());
    let coordinator = Coordinator::new(
        Session::new(Arc::new(Account::generate())),
        Arc::new(MemoryStore::new()),
        packages,
    )
    .with_ledger(ledger.clone());

    let id = coordinator.create(&package).await.unwrap().id;
    assert!(ledger.is_empty());

    let report = coordinator.verify(&id).await.unwrap();
    assert_eq!(
        report.anchors.unwrap()[0].status,
        AnchorStatus::NotFound
    );
}

#[tokio::test]
async fn delete_removes_every_partition() {
    let host = host();
    let id = host.coordinator.create(&host.package).await.unwrap().id;
    assert_eq!(host.coordinator.list().await.unwrap(), vec![id.clone()]);

    host.coordinator.delete(&id).await.unwrap();
    assert!(host.coordinator.list().await.unwrap().is_empty());
    assert_eq!(host.store.get(&id).unwrap(), None);
    assert_eq!(host.store.applied(&id).unwrap(), None);

    assert!(matches!(
        host.coordinator.query(&id, json!({"get_info": {}})).await,
        Err(Error::UnknownInstance(_))
    ));
    assert!(matches!(
        host.coordinator.delete(&id).await,
        Err(Error::UnknownInstance(_))
    ));
}

#[tokio::test]
async fn unknown_package_fails_before_anything_is_stored() {
    let host = host();
    let err = host.coordinator.create("1220abcd").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Package(PackageError::MissingBytecode(_))
    ));
    assert!(host.coordinator.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn tampered_chain_on_disk_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let store = DiskStore::open(dir.path()).unwrap();
    let root = store.root().to_path_buf();
    let coordinator = Coordinator::new(
        Session::new(Arc::new(Account::generate())),
        Arc::new(store),
        packages,
    );

    let id = coordinator.create(&package).await.unwrap().id;
    coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap();

    let path = root.join(&id).join("chain.json");
    let mut record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    record["chain"]["events"][1]["timestamp"] = json!(1);
    std::fs::write(&path, record.to_string()).unwrap();

    let err = coordinator
        .query(&id, json!({"get_info": {}}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChainIntegrity(_)));
    assert!(matches!(
        coordinator.verify(&id).await,
        Err(Error::ChainIntegrity(_))
    ));
}

/// A worker that can be told to answer the next state change without memory.
struct Faulty {
    inner: WorkerIsolate,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl Isolate for Faulty {
    async fn init(&mut self, bytecode: &[u8]) -> ownables_sandbox::Result<()> {
        self.inner.init(bytecode).await
    }

    async fn call(&mut self, request: Request) -> ownables_sandbox::Result<Response> {
        if self.broken.swap(false, Ordering::SeqCst) {
            return Ok(Response::ok(json!({"attributes": []}), None));
        }
        self.inner.call(request).await
    }
}

struct FaultyLauncher {
    broken: Arc<AtomicBool>,
    launches: AtomicUsize,
}

impl Launcher for FaultyLauncher {
    fn launch(&self) -> Box<dyn Isolate> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Box::new(Faulty {
            inner: WorkerIsolate::spawn(ModuleRegistry::standard()),
            broken: self.broken.clone(),
        })
    }
}

#[tokio::test]
async fn protocol_violation_restarts_the_sandbox() {
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let broken = Arc::new(AtomicBool::new(false));
    let launcher = Arc::new(FaultyLauncher {
        broken: broken.clone(),
        launches: AtomicUsize::new(0),
    });
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(
        Session::new(Arc::new(Account::generate())),
        store.clone(),
        packages,
    )
    .with_launcher(launcher.clone());

    let id = coordinator.create(&package).await.unwrap().id;
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    let dump = store.get(&id).unwrap();

    broken.store(true, Ordering::SeqCst);
    let err = coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ProtocolViolation(ProtocolViolation::UnexpectedResponse(_))
    ));
    assert_eq!(store.get(&id).unwrap(), dump);

    coordinator
        .execute(&id, json!({"lock": {}}))
        .await
        .unwrap();
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
}

/// Fails the first `failures` dump writes with a transient error.
struct Flaky {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl StateDumpStore for Flaky {
    fn get(&self, id: &str) -> ownables_state_store::Result<Option<StateDump>> {
        self.inner.get(id)
    }

    fn put(&self, id: &str, dump: &StateDump) -> ownables_state_store::Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Io(std::io::Error::from(
                std::io::ErrorKind::Interrupted,
            )));
        }
        self.inner.put(id, dump)
    }

    fn remove(&self, id: &str) -> ownables_state_store::Result<()> {
        StateDumpStore::remove(&self.inner, id)
    }
}

impl ChainStore for Flaky {
    fn load_chain(&self, id: &str) -> ownables_state_store::Result<Option<ChainRecord>> {
        self.inner.load_chain(id)
    }

    fn save_chain(&self, id: &str, record: &ChainRecord) -> ownables_state_store::Result<()> {
        self.inner.save_chain(id, record)
    }

    fn applied(&self, id: &str) -> ownables_state_store::Result<Option<Hash>> {
        self.inner.applied(id)
    }

    fn set_applied(&self, id: &str, hash: &Hash) -> ownables_state_store::Result<()> {
        self.inner.set_applied(id, hash)
    }

    fn list(&self) -> ownables_state_store::Result<Vec<String>> {
        self.inner.list()
    }

    fn delete(&self, id: &str) -> ownables_state_store::Result<()> {
        self.inner.delete(id)
    }
}

fn flaky_coordinator(failures: usize, retries: u32) -> (Coordinator, String) {
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let store = Flaky {
        inner: MemoryStore::new(),
        failures: AtomicUsize::new(failures),
    };
    let coordinator = Coordinator::new(
        Session::new(Arc::new(Account::generate())),
        Arc::new(store),
        packages,
    )
    .with_storage_retries(retries)
    .with_launcher(Arc::new(WorkerLauncher::default()));
    (coordinator, package)
}

#[tokio::test]
async fn transient_storage_faults_are_retried() {
    let (coordinator, package) = flaky_coordinator(2, 3);
    let id = coordinator.create(&package).await.unwrap().id;
    assert_eq!(coordinator.record(&id).await.unwrap().chain.len(), 1);
}

#[tokio::test]
async fn storage_faults_beyond_the_retry_budget_surface() {
    let (coordinator, package) = flaky_coordinator(5, 1);
    let err = coordinator.create(&package).await.unwrap_err();
    assert!(matches!(err, Error::Storage(e) if e.is_transient()));
    assert!(coordinator.list().await.unwrap().is_empty());
}

/// Refuses chain writes for one chosen instance.
#[derive(Default)]
struct Refusing {
    inner: MemoryStore,
    refuse: Mutex<Option<String>>,
}

impl StateDumpStore for Refusing {
    fn get(&self, id: &str) -> ownables_state_store::Result<Option<StateDump>> {
        self.inner.get(id)
    }

    fn put(&self, id: &str, dump: &StateDump) -> ownables_state_store::Result<()> {
        self.inner.put(id, dump)
    }

    fn remove(&self, id: &str) -> ownables_state_store::Result<()> {
        StateDumpStore::remove(&self.inner, id)
    }
}

impl ChainStore for Refusing {
    fn load_chain(&self, id: &str) -> ownables_state_store::Result<Option<ChainRecord>> {
        self.inner.load_chain(id)
    }

    fn save_chain(&self, id: &str, record: &ChainRecord) -> ownables_state_store::Result<()> {
        if self.refuse.lock().unwrap().as_deref() == Some(id) {
            return Err(StoreError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )));
        }
        self.inner.save_chain(id, record)
    }

    fn applied(&self, id: &str) -> ownables_state_store::Result<Option<Hash>> {
        self.inner.applied(id)
    }

    fn set_applied(&self, id: &str, hash: &Hash) -> ownables_state_store::Result<()> {
        self.inner.set_applied(id, hash)
    }

    fn list(&self) -> ownables_state_store::Result<Vec<String>> {
        self.inner.list()
    }

    fn delete(&self, id: &str) -> ownables_state_store::Result<()> {
        self.inner.delete(id)
    }
}

#[tokio::test]
async fn consume_rolls_back_when_the_second_chain_cannot_be_written() {
    let packages = Arc::new(MemoryResolver::new());
    let package = package(&packages);
    let store = Arc::new(Refusing::default());
    let coordinator = Coordinator::new(
        Session::new(Arc::new(Account::generate())),
        store.clone(),
        packages,
    );

    let consumer = coordinator.create(&package).await.unwrap().id;
    let consumable = coordinator.create(&package).await.unwrap().id;
    let consumer_dump = store.get(&consumer).unwrap();
    let consumable_dump = store.get(&consumable).unwrap();

    *store.refuse.lock().unwrap() = Some(consumer.clone());
    let err = coordinator
        .consume(&consumer, &consumable)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    assert_eq!(coordinator.record(&consumable).await.unwrap().chain.len(), 1);
    assert_eq!(coordinator.record(&consumer).await.unwrap().chain.len(), 1);
    assert_eq!(store.get(&consumable).unwrap(), consumable_dump);
    assert_eq!(store.get(&consumer).unwrap(), consumer_dump);

    *store.refuse.lock().unwrap() = None;
    coordinator
        .consume(&consumer, &consumable)
        .await
        .unwrap();
    assert_eq!(coordinator.record(&consumable).await.unwrap().chain.len(), 2);
}
