//! In-memory edge and checkpoint stores.
//!
//! Process-lifetime defaults so the server runs stand-alone; durable
//! backends implement the same `harvester` traits and slot in via
//! `ServerDeps`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use harvester::{BatchManifest, CheckpointStore, ConnectionCategory, DedupStore};

#[derive(Default)]
pub struct InMemoryDedupStore {
    edges: Mutex<HashSet<(String, String)>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().unwrap().len()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn exists(&self, owner_id: &str, item_id: &str) -> Result<bool> {
        Ok(self
            .edges
            .lock()
            .unwrap()
            .contains(&(owner_id.to_string(), item_id.to_string())))
    }

    async fn record(&self, owner_id: &str, item_id: &str, _status: &str) -> Result<()> {
        self.edges
            .lock()
            .unwrap()
            .insert((owner_id.to_string(), item_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    manifests: Mutex<HashMap<(String, ConnectionCategory), BatchManifest>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn read_manifest(
        &self,
        master_index_ref: &str,
        category: ConnectionCategory,
    ) -> Result<Option<BatchManifest>> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .get(&(master_index_ref.to_string(), category))
            .cloned())
    }

    async fn write_manifest(
        &self,
        master_index_ref: &str,
        manifest: &BatchManifest,
    ) -> Result<()> {
        self.manifests.lock().unwrap().insert(
            (master_index_ref.to_string(), manifest.category),
            manifest.clone(),
        );
        Ok(())
    }
}
