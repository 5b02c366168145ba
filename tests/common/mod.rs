//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::PathBuf;

use atlasdict::StoreConfig;
use tempfile::TempDir;

/// Route `tracing` output through the test harness (RUST_LOG=atlasdict=debug)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn setup_temp_store() -> (TempDir, PathBuf) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");
    (temp_dir, path)
}

/// On-disk config whose lock file lives in the temp dir too
pub fn disk_config(temp_dir: &TempDir) -> StoreConfig {
    StoreConfig::builder()
        .path(temp_dir.path().join("store"))
        .lock_path(temp_dir.path().join("locks").join("test.lock"))
        .build()
        .unwrap()
}
