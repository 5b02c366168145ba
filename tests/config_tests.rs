//! Tests for StoreConfig
//!
//! These tests verify:
//! - Builder validation of the storage location
//! - Path absolutization
//! - Namespace and lock path resolution
//! - Environment overrides

use std::env;
use std::path::PathBuf;

use atlasdict::config::{ENV_IN_MEMORY, ENV_LIBRARY, ENV_LOCK_PATH, ENV_NAMESPACE, ENV_PATH};
use atlasdict::{AtlasError, ObjectFormat, StoreConfig};

// =============================================================================
// Builder Tests
// =============================================================================

#[test]
fn test_builder_defaults() {
    let config = StoreConfig::in_memory().unwrap();

    assert!(config.in_memory);
    assert!(config.path.is_none());
    assert!(config.library_path.is_none());
    assert!(config.auto_serialize);
    assert_eq!(config.object_format, ObjectFormat::Bincode);
    assert!(config.lock_path.is_none());
    assert!(config.namespace.is_none());
    assert_eq!(config.storage_path(), None);
}

#[test]
fn test_builder_requires_a_location() {
    let result = StoreConfig::builder().build();
    assert!(matches!(result, Err(AtlasError::Config(_))));
}

#[test]
fn test_builder_rejects_path_with_in_memory() {
    let result = StoreConfig::builder().path("/tmp/x").in_memory(true).build();
    assert!(matches!(result, Err(AtlasError::Config(_))));
}

#[test]
fn test_builder_rejects_empty_path() {
    let result = StoreConfig::builder().path("").build();
    assert!(matches!(result, Err(AtlasError::Config(_))));
}

#[test]
fn test_relative_paths_are_absolutized() {
    let config = StoreConfig::builder()
        .path("data/store")
        .lock_path("locks/app.lock")
        .build()
        .unwrap();

    let cwd = env::current_dir().unwrap();
    assert_eq!(config.path, Some(cwd.join("data/store")));
    assert_eq!(config.lock_path, Some(cwd.join("locks/app.lock")));
    assert_eq!(config.storage_path(), Some(cwd.join("data/store").as_path()));
}

#[test]
fn test_builder_setters() {
    let config = StoreConfig::builder()
        .path("/var/lib/app")
        .library_path("/opt/lib/libengine.so")
        .auto_serialize(false)
        .object_format(ObjectFormat::Json)
        .namespace("tenant-a")
        .build()
        .unwrap();

    assert_eq!(config.library_path, Some(PathBuf::from("/opt/lib/libengine.so")));
    assert!(!config.auto_serialize);
    assert_eq!(config.object_format, ObjectFormat::Json);
    assert_eq!(config.namespace.as_deref(), Some("tenant-a"));
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[test]
fn test_namespace_for() {
    let config = StoreConfig::in_memory().unwrap();
    assert_eq!(config.namespace_for("User"), "User");

    let mut config = config;
    config.namespace = Some("shared".into());
    assert_eq!(config.namespace_for("User"), "shared");

    config.namespace = Some(String::new());
    assert_eq!(config.namespace_for("User"), "User");
}

#[test]
fn test_lock_path_resolution() {
    let on_disk = StoreConfig::on_disk("/srv/db").unwrap();
    assert_eq!(on_disk.resolve_lock_path("User"), PathBuf::from("/srv/db/.atlasdict.lock"));
    // every type on one directory shares the lock
    assert_eq!(on_disk.resolve_lock_path("Order"), on_disk.resolve_lock_path("User"));

    let in_memory = StoreConfig::in_memory().unwrap();
    assert_eq!(
        in_memory.resolve_lock_path("User"),
        env::temp_dir().join("atlasdict-User.lock")
    );

    let explicit = StoreConfig::builder()
        .in_memory(true)
        .lock_path("/run/app.lock")
        .build()
        .unwrap();
    assert_eq!(explicit.resolve_lock_path("User"), PathBuf::from("/run/app.lock"));
}

// =============================================================================
// Environment Tests
// =============================================================================

// The only test in this binary that touches ATLASDICT_* variables.
#[test]
fn test_from_env() {
    env::remove_var(ENV_IN_MEMORY);
    env::set_var(ENV_PATH, "/tmp/atlasdict-env");
    env::set_var(ENV_LIBRARY, "/tmp/libengine.so");
    env::set_var(ENV_LOCK_PATH, "/tmp/atlasdict-env.lock");
    env::set_var(ENV_NAMESPACE, "from-env");

    let config = StoreConfig::from_env().unwrap();
    assert_eq!(config.path, Some(PathBuf::from("/tmp/atlasdict-env")));
    assert_eq!(config.library_path, Some(PathBuf::from("/tmp/libengine.so")));
    assert_eq!(config.lock_path, Some(PathBuf::from("/tmp/atlasdict-env.lock")));
    assert_eq!(config.namespace.as_deref(), Some("from-env"));

    env::remove_var(ENV_PATH);
    env::set_var(ENV_IN_MEMORY, "true");
    let config = StoreConfig::from_env().unwrap();
    assert!(config.in_memory);

    env::set_var(ENV_IN_MEMORY, "0");
    assert!(matches!(StoreConfig::from_env(), Err(AtlasError::Config(_))));

    for var in [ENV_PATH, ENV_IN_MEMORY, ENV_LIBRARY, ENV_LOCK_PATH, ENV_NAMESPACE] {
        env::remove_var(var);
    }
}
