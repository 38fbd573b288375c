//! Behaviour shared by every store implementation.

use ownables_event_chain::{Account, Event, EventChain};
use ownables_state_store::{
    ChainRecord, ChainStore, DiskStore, MemoryStore, StateDump, StateDumpStore, Store,
};
use serde_json::json;

fn record_with_events(n: u64) -> ChainRecord {
    let account = Account::from_seed([4u8; 32]);
    let mut chain = EventChain::create(&account);
    for i in 0..n {
        let event = Event::json(&json!({"@context": "execute_msg.json", "n": i})).unwrap();
        chain.add(event, &account).unwrap();
    }
    ChainRecord::new(chain, "1220feed")
}

fn exercise(store: &dyn Store) {
    let record = record_with_events(2);
    let id = record.chain.id().to_hex();

    assert_eq!(store.load_chain(&id).unwrap(), None);
    assert!(store.list().unwrap().is_empty());

    store
        .put(&id, &StateDump::new(vec![(b"k".to_vec(), b"v".to_vec())]))
        .unwrap();
    store.save_chain(&id, &record).unwrap();
    store.set_applied(&id, &record.latest_hash).unwrap();

    let loaded = store.load_chain(&id).unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(loaded.chain.len(), 2);
    assert_eq!(store.list().unwrap(), vec![id.clone()]);
    assert_eq!(store.applied(&id).unwrap(), Some(record.latest_hash));

    let mut advanced = loaded.clone();
    advanced.anchored = Some(advanced.latest_hash);
    store.save_chain(&id, &advanced).unwrap();
    assert_eq!(
        store.load_chain(&id).unwrap().unwrap().anchored,
        Some(record.latest_hash)
    );

    store.delete(&id).unwrap();
    store.remove(&id).unwrap();
    assert_eq!(store.load_chain(&id).unwrap(), None);
    assert_eq!(store.get(&id).unwrap(), None);
    assert_eq!(store.applied(&id).unwrap(), None);
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn memory_store_contract() {
    exercise(&MemoryStore::new());
}

#[test]
fn disk_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise(&DiskStore::open(dir.path()).unwrap());
}

#[test]
fn disk_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let record = record_with_events(3);
    let id = record.chain.id().to_hex();
    {
        let store = DiskStore::open(dir.path()).unwrap();
        store.save_chain(&id, &record).unwrap();
    }

    let store = DiskStore::open(dir.path()).unwrap();
    let loaded = store.load_chain(&id).unwrap().unwrap();
    assert_eq!(loaded.chain, record.chain);
    assert!(loaded.chain.validate().is_ok());
}

#[test]
fn disk_store_rejects_tampered_chain() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::open(dir.path()).unwrap();
    let record = record_with_events(2);
    let id = record.chain.id().to_hex();
    store.save_chain(&id, &record).unwrap();

    let path = dir.path().join(&id).join("chain.json");
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    value["chain"]["events"][1]["mediaType"] = json!("text/plain");
    std::fs::write(&path, value.to_string()).unwrap();

    assert!(matches!(
        store.load_chain(&id),
        Err(ownables_state_store::StoreError::Chain(_))
    ));
}
