//! Shared test utilities for storage engine integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cask::catalog::{
    MemoryReplicaStore, MetadataStore, PublicStoreCredentials, StoreConfig,
};
use cask::crypto::SecretKey;
use cask::engine::{MemoryContentBackend, MemoryMessaging, StorageEngine};
use cask::identity::{CredentialIssuer, Identity, MemoryCredentialIssuer};

/// One engine plus handles to the shared in-memory providers behind it
pub struct TestEnv {
    pub engine: StorageEngine,
    pub identity: Identity,
    pub replica: MemoryReplicaStore,
    pub backend: MemoryContentBackend,
    pub messaging: MemoryMessaging,
}

/// Install a log subscriber honoring RUST_LOG, once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn public_credentials() -> PublicStoreCredentials {
    PublicStoreCredentials {
        username: "public".to_string(),
        passphrase: "public-pw".to_string(),
    }
}

pub async fn authed_identity() -> Identity {
    let secret = SecretKey::generate();
    let auth = MemoryCredentialIssuer.issue(&secret).await.unwrap();
    Identity::with_auth(secret, auth)
}

/// Set up an engine for a fresh identity on fresh providers
pub async fn setup() -> TestEnv {
    setup_on(
        MemoryReplicaStore::new(),
        MemoryContentBackend::new(),
        MemoryMessaging::new(),
    )
    .await
}

/// Set up an engine for a fresh identity on existing providers, so several
/// identities can share one backend and messaging transport
pub async fn setup_on(
    replica: MemoryReplicaStore,
    backend: MemoryContentBackend,
    messaging: MemoryMessaging,
) -> TestEnv {
    init_tracing();
    let identity = authed_identity().await;

    let config = StoreConfig::new(public_credentials())
        .with_hydration_window(Duration::from_millis(20));
    let store = MetadataStore::open(
        identity.store_credentials(),
        config,
        Arc::new(replica.clone()),
    )
    .await
    .unwrap();

    let engine = StorageEngine::new(
        identity.clone(),
        store,
        Arc::new(backend.clone()),
        Arc::new(messaging.clone()),
        Arc::new(MemoryCredentialIssuer),
    );

    TestEnv {
        engine,
        identity,
        replica,
        backend,
        messaging,
    }
}
