// ── VIP ingress port directory ──
//
// The shared port in front of the appliance only forwards addresses on its
// allow-list. The directory is owned by the surrounding platform; every
// read-modify-write of a port's list holds that port's lock.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::CoreError;

#[async_trait]
pub trait PortDirectory: Send + Sync {
    async fn allowed_addresses(&self, port_id: &str) -> Result<Vec<String>, CoreError>;

    async fn set_allowed_addresses(&self, port_id: &str, addresses: Vec<String>) -> Result<(), CoreError>;
}

/// Port directory kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryPortDirectory {
    ports: DashMap<String, Vec<String>>,
}

impl MemoryPortDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addresses(&self, port_id: &str) -> Vec<String> {
        self.ports.get(port_id).map(|a| a.clone()).unwrap_or_default()
    }

    pub fn seed(&self, port_id: &str, addresses: Vec<String>) {
        self.ports.insert(port_id.to_owned(), addresses);
    }
}

#[async_trait]
impl PortDirectory for MemoryPortDirectory {
    async fn allowed_addresses(&self, port_id: &str) -> Result<Vec<String>, CoreError> {
        Ok(self.addresses(port_id))
    }

    async fn set_allowed_addresses(&self, port_id: &str, addresses: Vec<String>) -> Result<(), CoreError> {
        self.ports.insert(port_id.to_owned(), addresses);
        Ok(())
    }
}

/// Serialized VIP plug/unplug over a [`PortDirectory`].
///
/// One instance is shared by every device driver, so two drivers fronted
/// by the same ingress port still take the same lock.
pub struct VipAllowList {
    directory: Arc<dyn PortDirectory>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VipAllowList {
    pub fn new(directory: Arc<dyn PortDirectory>) -> Self {
        Self {
            directory,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, port: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(port.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Add `vip` to the allow-list of `port`. Returns `false` if it was
    /// already there.
    pub async fn plug(&self, port: &str, vip: &str) -> Result<bool, CoreError> {
        let lock = self.lock_for(port);
        let _held = lock.lock().await;

        let mut addresses = self.directory.allowed_addresses(port).await?;
        if addresses.iter().any(|a| a == vip) {
            debug!(port, vip, "VIP already allowed");
            return Ok(false);
        }
        addresses.push(vip.to_owned());
        self.directory.set_allowed_addresses(port, addresses).await?;
        info!(port, vip, "VIP plugged");
        Ok(true)
    }

    /// Remove every occurrence of `vip`. Returns how many entries were
    /// dropped.
    pub async fn unplug(&self, port: &str, vip: &str) -> Result<usize, CoreError> {
        let lock = self.lock_for(port);
        let _held = lock.lock().await;

        let mut addresses = self.directory.allowed_addresses(port).await?;
        let before = addresses.len();
        addresses.retain(|a| a != vip);
        let dropped = before - addresses.len();
        if dropped > 0 {
            self.directory.set_allowed_addresses(port, addresses).await?;
            info!(port, vip, dropped, "VIP unplugged");
        }
        Ok(dropped)
    }
}

impl std::fmt::Debug for VipAllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VipAllowList")
            .field("ports", &self.locks.len())
            .finish_non_exhaustive()
    }
}
