//! Development fallbacks for the external collaborators.
//!
//! The production deployment wires a real CDP driver, a real collector,
//! and a secrets-manager-backed credential resolver. These stand-ins
//! keep the server runnable (and the workflow paths exercisable) without
//! any of that infrastructure.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use harvester::{
    AutomationDriver, ConnectionCategory, CredentialResolver, Credentials, DriverFactory,
    ItemCollector, ItemRef, WorkflowState,
};

/// Always-healthy in-process driver. Stands in for the real browser
/// session while the actual driver wiring lives in the deployment crate.
pub struct DevDriver;

#[async_trait]
impl AutomationDriver for DevDriver {
    fn is_connected(&self) -> bool {
        true
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!(2))
    }

    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok("about:blank".to_string())
    }

    async fn challenge_pending(&self) -> Result<bool> {
        Ok(false)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct DevDriverFactory;

#[async_trait]
impl DriverFactory for DevDriverFactory {
    async fn launch(&self) -> Result<Box<dyn AutomationDriver>> {
        debug!("launching development driver");
        Ok(Box::new(DevDriver))
    }
}

/// Collector over synthetic listings; each item is a short pause.
pub struct DevCollector {
    totals: HashMap<ConnectionCategory, u32>,
    item_delay: Duration,
}

impl DevCollector {
    pub fn new(total_per_category: u32) -> Self {
        Self {
            totals: ConnectionCategory::ALL
                .into_iter()
                .map(|c| (c, total_per_category))
                .collect(),
            item_delay: Duration::from_millis(1),
        }
    }

    pub fn with_totals(totals: HashMap<ConnectionCategory, u32>) -> Self {
        Self {
            totals,
            item_delay: Duration::from_millis(1),
        }
    }
}

#[async_trait]
impl ItemCollector for DevCollector {
    async fn count_items(&self, category: ConnectionCategory) -> Result<u32> {
        Ok(self.totals.get(&category).copied().unwrap_or(0))
    }

    async fn process(&self, item: &ItemRef, state: &WorkflowState) -> Result<()> {
        tokio::time::sleep(self.item_delay).await;
        debug!(request_id = %state.request_id, item = %item.identity(), "dev-collected item");
        Ok(())
    }
}

/// Resolves every ciphertext reference to a fixed development secret.
pub struct StaticCredentialResolver;

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, ciphertext_ref: &str) -> Result<Credentials> {
        Ok(Credentials {
            identity: format!("dev:{ciphertext_ref}"),
            secret: "dev-secret".to_string(),
        })
    }
}
