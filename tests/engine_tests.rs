//! Tests for the bundled engine
//!
//! These tests verify:
//! - Basic get/put/delete through `Engine`
//! - WAL replay after a crash (engine dropped without close)
//! - Flushes, tombstones and compaction across table files
//! - The C ABI: handles, last-error register and buffer ownership

mod common;

use std::ffi::CStr;
use std::os::raw::c_int;
use std::ptr;

use atlasdict::native::bundled::{self, Engine, EngineOptions, WalSyncStrategy, KEY_NOT_FOUND};
use atlasdict::AtlasError;
use common::setup_temp_store;

// =============================================================================
// Helper Functions
// =============================================================================

fn small_options() -> EngineOptions {
    EngineOptions {
        wal_sync_strategy: WalSyncStrategy::EveryWrite,
        memtable_size_limit: 256,
        compaction_trigger: 3,
    }
}

fn last_error_message() -> Option<String> {
    // SAFETY: the returned string is copied and freed once.
    unsafe {
        let raw = bundled::last_error();
        if raw.is_null() {
            return None;
        }
        let message = CStr::from_ptr(raw).to_string_lossy().into_owned();
        bundled::free_cstring(raw);
        Some(message)
    }
}

// =============================================================================
// Engine Tests
// =============================================================================

#[test]
fn test_engine_basic_operations() {
    let (_temp, path) = setup_temp_store();
    let engine = Engine::open(&path, EngineOptions::default()).unwrap();

    engine.put(b"k1", b"v1").unwrap();
    engine.put(b"k2", b"v2").unwrap();
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"v1".to_vec()));

    assert!(engine.delete(b"k1").unwrap());
    assert!(!engine.delete(b"k1").unwrap());
    assert_eq!(engine.get(b"k1").unwrap(), None);
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert!(!engine.is_in_memory());
}

#[test]
fn test_engine_crash_recovery() {
    let (_temp, path) = setup_temp_store();
    {
        let engine = Engine::open(&path, EngineOptions::default()).unwrap();
        engine.put(b"durable", b"yes").unwrap();
        engine.put(b"gone", b"soon").unwrap();
        engine.delete(b"gone").unwrap();
        // dropped without close: only the WAL holds these writes
    }

    let engine = Engine::open(&path, EngineOptions::default()).unwrap();
    assert_eq!(engine.get(b"durable").unwrap(), Some(b"yes".to_vec()));
    assert_eq!(engine.get(b"gone").unwrap(), None);
}

#[test]
fn test_engine_directory_lock() {
    let (_temp, path) = setup_temp_store();
    let first = Engine::open(&path, EngineOptions::default()).unwrap();

    let second = Engine::open(&path, EngineOptions::default());
    assert!(matches!(second, Err(AtlasError::StorageFailure(_))));

    drop(first);
    Engine::open(&path, EngineOptions::default()).unwrap();
}

#[test]
fn test_engine_flush_and_compaction() {
    let (_temp, path) = setup_temp_store();
    let engine = Engine::open(&path, small_options()).unwrap();

    for i in 0..200u32 {
        engine.put(format!("key{:04}", i).as_bytes(), &[7u8; 32]).unwrap();
    }
    for i in (0..200u32).step_by(2) {
        engine.delete(format!("key{:04}", i).as_bytes()).unwrap();
    }
    engine.flush().unwrap();

    // compaction keeps the table count bounded
    assert!(engine.table_count() <= 4);

    assert_eq!(engine.get(b"key0000").unwrap(), None);
    assert_eq!(engine.get(b"key0001").unwrap(), Some(vec![7u8; 32]));
    assert_eq!(engine.scan(b"key").unwrap().len(), 100);
}

#[test]
fn test_engine_tombstone_shadows_older_table() {
    let (_temp, path) = setup_temp_store();
    let engine = Engine::open(&path, EngineOptions::default()).unwrap();

    engine.put(b"k", b"old").unwrap();
    engine.flush().unwrap();
    engine.delete(b"k").unwrap();
    engine.flush().unwrap();
    engine.close().unwrap();
    drop(engine);

    let engine = Engine::open(&path, EngineOptions::default()).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), None);
    assert!(engine.scan(b"").unwrap().is_empty());
}

#[test]
fn test_in_memory_engine() {
    let engine = Engine::in_memory(EngineOptions::default());
    assert!(engine.is_in_memory());

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    assert!(engine.delete(b"a").unwrap());

    assert_eq!(engine.scan(b"").unwrap(), vec![(b"b".to_vec(), b"2".to_vec())]);
    assert_eq!(engine.table_count(), 0);
}

// =============================================================================
// ABI Tests
// =============================================================================

#[test]
fn test_abi_miss_sets_not_found() {
    // SAFETY: valid pointers and lengths for every call.
    unsafe {
        let handle = bundled::open(ptr::null(), 1);
        assert_ne!(handle, 0);

        let mut len: c_int = -1;
        let buf = bundled::get(handle, b"missing".as_ptr() as *const _, 7, &mut len);
        assert!(buf.is_null());
        assert_eq!(len, 0);
        assert_eq!(last_error_message().as_deref(), Some(KEY_NOT_FOUND));

        assert_eq!(bundled::delete(handle, b"missing".as_ptr() as *const _, 7), -1);
        assert_eq!(last_error_message().as_deref(), Some(KEY_NOT_FOUND));

        assert_eq!(bundled::close(handle), 0);
        assert!(last_error_message().is_none());
    }
}

#[test]
fn test_abi_empty_value_is_non_null() {
    // SAFETY: valid pointers and lengths for every call.
    unsafe {
        let handle = bundled::open(ptr::null(), 1);
        assert_eq!(bundled::set(handle, b"e".as_ptr() as *const _, 1, b"".as_ptr() as *const _, 0), 0);

        let mut len: c_int = -1;
        let buf = bundled::get(handle, b"e".as_ptr() as *const _, 1, &mut len);
        assert!(!buf.is_null());
        assert_eq!(len, 0);
        assert!(last_error_message().is_none());
        bundled::free_buffer(buf);

        bundled::close(handle);
    }
}

#[test]
fn test_abi_invalid_handle() {
    // SAFETY: the handle is never valid; no buffers are returned.
    unsafe {
        assert_eq!(bundled::close(usize::MAX), -1);
        assert_eq!(last_error_message().as_deref(), Some("invalid handle"));
        assert_eq!(bundled::sync(usize::MAX), -1);
    }
}

#[test]
fn test_abi_open_without_path_fails() {
    // SAFETY: a null path is allowed and reported through the register.
    unsafe {
        assert_eq!(bundled::open(ptr::null(), 0), 0);
        let message = last_error_message().unwrap();
        assert!(message.contains("path"));
    }
}
