//! Tests for persistent collections
//!
//! These tests verify:
//! - Atomic update with and without a default factory
//! - Replace vs in-place mutation
//! - Aborted updates leave the stored record untouched
//! - Lost-update freedom across threads (on-disk and in-memory)
//! - Namespace isolation and derived operations (load/get/save/delete/exists)

mod common;

use std::sync::Arc;
use std::thread;

use atlasdict::{AtlasError, Collection, Mutation, ObjectFormat, Persistent, Store, StoreConfig};
use common::{disk_config, init_tracing};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

// =============================================================================
// Test Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
struct Counter {
    id: String,
    count: u64,
}

#[derive(Serialize, Deserialize)]
struct CounterRecord {
    count: u64,
}

impl Persistent for Counter {
    type Key = String;
    type Record = CounterRecord;

    fn key(&self) -> &String {
        &self.id
    }

    fn set_key(&mut self, key: String) {
        self.id = key;
    }

    fn to_record(&self) -> CounterRecord {
        CounterRecord { count: self.count }
    }

    fn from_record(key: String, record: CounterRecord) -> atlasdict::Result<Self> {
        Ok(Counter {
            id: key,
            count: record.count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    id: u64,
    title: String,
    tags: Vec<String>,
}

impl Persistent for Note {
    type Key = u64;
    type Record = Note;

    fn type_name() -> &'static str {
        "notes"
    }

    fn key(&self) -> &u64 {
        &self.id
    }

    fn set_key(&mut self, key: u64) {
        self.id = key;
    }

    fn to_record(&self) -> Note {
        self.clone()
    }

    fn from_record(key: u64, record: Note) -> atlasdict::Result<Self> {
        Ok(Note { id: key, ..record })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn memory_config(temp_dir: &TempDir) -> StoreConfig {
    StoreConfig::builder()
        .in_memory(true)
        .lock_path(temp_dir.path().join("memory.lock"))
        .build()
        .unwrap()
}

fn increment(c: &mut Counter) -> Mutation<Counter> {
    c.count += 1;
    Mutation::KeepMutated
}

fn sample_note(id: u64) -> Note {
    Note {
        id,
        title: format!("note {}", id),
        tags: vec!["draft".to_string()],
    }
}

// =============================================================================
// Naming Tests
// =============================================================================

#[test]
fn test_default_namespace_is_type_name() {
    init_tracing();
    let temp = TempDir::new().unwrap();

    assert_eq!(Counter::type_name(), "Counter");

    let counters: Collection<Counter> = Collection::open(disk_config(&temp)).unwrap();
    assert_eq!(counters.namespace(), "Counter");

    let notes: Collection<Note> = Collection::open(disk_config(&temp)).unwrap();
    assert_eq!(notes.namespace(), "notes");
}

#[test]
fn test_lock_path_defaults_to_one_file_per_store() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig::on_disk(temp.path().join("db")).unwrap();

    let counters: Collection<Counter> = Collection::open(config).unwrap();
    assert_eq!(counters.lock_path(), temp.path().join("db").join(".atlasdict.lock"));

    let notes: Collection<Note> = Collection::open(StoreConfig::on_disk(temp.path().join("db")).unwrap()).unwrap();
    assert_eq!(notes.lock_path(), counters.lock_path());
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_or_default_creates_record() {
    let temp = TempDir::new().unwrap();
    let counters: Collection<Counter> = Collection::open(disk_config(&temp)).unwrap();

    let created = counters
        .update_or_default(&"visits".to_string(), Counter::default, increment)
        .unwrap();
    assert_eq!(
        created,
        Counter {
            id: "visits".into(),
            count: 1
        }
    );

    let updated = counters.update(&"visits".to_string(), increment).unwrap();
    assert_eq!(updated.count, 2);
    assert_eq!(counters.load(&"visits".to_string()).unwrap().count, 2);
}

#[test]
fn test_update_missing_without_factory() {
    let temp = TempDir::new().unwrap();
    let counters: Collection<Counter> = Collection::open(disk_config(&temp)).unwrap();

    let result = counters.update(&"absent".to_string(), increment);
    assert!(matches!(result, Err(AtlasError::KeyMissing(_))));
    assert!(!counters.exists(&"absent".to_string()).unwrap());
}

#[test]
fn test_replace_mutation() {
    let temp = TempDir::new().unwrap();
    let notes: Collection<Note> = Collection::open(disk_config(&temp)).unwrap();
    notes.save(&sample_note(1)).unwrap();

    let replaced = notes
        .update(&1, |current| {
            Mutation::Replace(Note {
                id: current.id,
                title: "rewritten".into(),
                tags: Vec::new(),
            })
        })
        .unwrap();

    assert_eq!(replaced.title, "rewritten");
    assert_eq!(notes.load(&1).unwrap(), replaced);
}

#[test]
fn test_replace_with_different_key_is_rejected() {
    let temp = TempDir::new().unwrap();
    let notes: Collection<Note> = Collection::open(disk_config(&temp)).unwrap();
    notes.save(&sample_note(1)).unwrap();

    let result = notes.update(&1, |_| Mutation::Replace(sample_note(2)));
    assert!(matches!(result, Err(AtlasError::TypeMismatch(_))));

    assert_eq!(notes.load(&1).unwrap(), sample_note(1));
    assert!(!notes.exists(&2).unwrap());
}

#[test]
fn test_failed_mutator_leaves_record_untouched() {
    let temp = TempDir::new().unwrap();
    let notes: Collection<Note> = Collection::open(disk_config(&temp)).unwrap();
    notes.save(&sample_note(5)).unwrap();

    let result = notes.try_update(&5, None, |note| {
        note.title = "half-done".into();
        Err(AtlasError::Config("mutator gave up".into()))
    });
    assert!(matches!(result, Err(AtlasError::Config(_))));

    assert_eq!(notes.load(&5).unwrap(), sample_note(5));
}

#[test]
fn test_failed_mutator_on_fresh_record_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let counters: Collection<Counter> = Collection::open(disk_config(&temp)).unwrap();

    let result = counters.try_update(&"c".to_string(), Some(Box::new(Counter::default)), |_| {
        Err(AtlasError::Encoding("no".into()))
    });
    assert!(result.is_err());
    assert_eq!(counters.get(&"c".to_string()).unwrap(), None);
}

// =============================================================================
// Derived Operation Tests
// =============================================================================

#[test]
fn test_save_load_delete() {
    let temp = TempDir::new().unwrap();
    let notes: Collection<Note> = Collection::open(disk_config(&temp)).unwrap();

    assert!(matches!(notes.load(&9), Err(AtlasError::KeyMissing(_))));
    assert_eq!(notes.get(&9).unwrap(), None);

    notes.save(&sample_note(9)).unwrap();
    assert!(notes.exists(&9).unwrap());
    assert_eq!(notes.load(&9).unwrap(), sample_note(9));

    assert!(notes.delete(&9).unwrap());
    assert!(!notes.delete(&9).unwrap());
    assert!(!notes.exists(&9).unwrap());
}

#[test]
fn test_load_or() {
    let temp = TempDir::new().unwrap();
    let notes: Collection<Note> = Collection::open(disk_config(&temp)).unwrap();

    let fallback = sample_note(3);
    assert_eq!(notes.load_or(&3, fallback.clone()).unwrap(), fallback);
    // load_or does not persist the fallback
    assert!(!notes.exists(&3).unwrap());
}

#[test]
fn test_store_is_closed_between_operations() {
    let temp = TempDir::new().unwrap();
    let config = disk_config(&temp);
    let notes: Collection<Note> = Collection::open(config.clone()).unwrap();
    notes.save(&sample_note(1)).unwrap();

    // the directory is free again, so a plain handle can open it
    let store = Store::from_config(&config).unwrap();
    assert!(store.is_open());
    store.close().unwrap();

    assert_eq!(notes.load(&1).unwrap(), sample_note(1));
}

#[test]
fn test_json_records() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig::builder()
        .path(temp.path().join("store"))
        .object_format(ObjectFormat::Json)
        .build()
        .unwrap();
    let notes: Collection<Note> = Collection::open(config).unwrap();

    notes.save(&sample_note(11)).unwrap();
    assert_eq!(notes.load(&11).unwrap(), sample_note(11));
}

#[test]
fn test_namespaces_are_isolated() {
    let temp = TempDir::new().unwrap();
    let base = disk_config(&temp);

    let mut alpha_config = base.clone();
    alpha_config.namespace = Some("alpha".into());
    let mut beta_config = base;
    beta_config.namespace = Some("beta".into());

    let alpha: Collection<Counter> = Collection::open(alpha_config).unwrap();
    let beta: Collection<Counter> = Collection::open(beta_config).unwrap();

    alpha
        .update_or_default(&"x".to_string(), Counter::default, increment)
        .unwrap();

    assert!(alpha.exists(&"x".to_string()).unwrap());
    assert!(!beta.exists(&"x".to_string()).unwrap());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_updates_on_disk() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let config = disk_config(&temp);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let config = config.clone();
            thread::spawn(move || {
                // each worker binds its own collection, like a separate process
                let counters: Collection<Counter> = Collection::open(config).unwrap();
                for _ in 0..50 {
                    counters
                        .update_or_default(&"shared".to_string(), Counter::default, increment)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let counters: Collection<Counter> = Collection::open(config).unwrap();
    assert_eq!(counters.load(&"shared".to_string()).unwrap().count, 200);
}

#[test]
fn test_concurrent_updates_in_memory() {
    let temp = TempDir::new().unwrap();
    let counters: Arc<Collection<Counter>> = Arc::new(Collection::open(memory_config(&temp)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counters = Arc::clone(&counters);
            thread::spawn(move || {
                for _ in 0..50 {
                    counters
                        .update_or_default(&"hits".to_string(), Counter::default, increment)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counters.load(&"hits".to_string()).unwrap().count, 200);
}

#[test]
fn test_two_types_share_one_directory_concurrently() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let config = StoreConfig::on_disk(temp.path().join("db")).unwrap();

    let counter_worker = {
        let config = config.clone();
        thread::spawn(move || {
            let counters: Collection<Counter> = Collection::open(config).unwrap();
            for _ in 0..100 {
                counters
                    .update_or_default(&"c".to_string(), Counter::default, increment)
                    .unwrap();
            }
        })
    };
    let note_worker = {
        let config = config.clone();
        thread::spawn(move || {
            let notes: Collection<Note> = Collection::open(config).unwrap();
            for i in 0..100u64 {
                notes
                    .update_or_default(&1, || sample_note(1), |note| {
                        note.tags.push(format!("rev{}", i));
                        Mutation::KeepMutated
                    })
                    .unwrap();
            }
        })
    };
    counter_worker.join().unwrap();
    note_worker.join().unwrap();

    let counters: Collection<Counter> = Collection::open(config.clone()).unwrap();
    let notes: Collection<Note> = Collection::open(config).unwrap();
    assert_eq!(counters.load(&"c".to_string()).unwrap().count, 100);
    // "draft" plus one tag per revision
    assert_eq!(notes.load(&1).unwrap().tags.len(), 101);
}
