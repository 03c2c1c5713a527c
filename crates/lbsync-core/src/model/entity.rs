// ── Logical load-balancing entities ──
//
// Owned by the external state store. The core reads full payloads and only
// ever writes the two status fields back.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity_id::EntityId;
use super::status::{OperatingStatus, ProvisioningStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Http,
    Https,
    TerminatedHttps,
    Tcp,
    Udp,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    RoundRobin,
    LeastConnections,
    SourceIp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorType {
    Http,
    Https,
    Ping,
    Tcp,
    TlsHello,
    UdpConnect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: EntityId,
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    pub vip_address: String,
    pub provisioning_status: ProvisioningStatus,
    pub operating_status: OperatingStatus,
    #[serde(default)]
    pub listener_ids: Vec<EntityId>,
    #[serde(default)]
    pub pool_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listener {
    pub id: EntityId,
    pub tenant_id: String,
    pub load_balancer_id: EntityId,
    pub protocol: Protocol,
    pub protocol_port: u16,
    /// `-1` means unlimited.
    pub connection_limit: i64,
    pub enabled: bool,
    pub default_pool_id: Option<EntityId>,
    pub provisioning_status: ProvisioningStatus,
    pub operating_status: OperatingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: EntityId,
    pub tenant_id: String,
    pub load_balancer_id: EntityId,
    pub listener_id: Option<EntityId>,
    pub protocol: Protocol,
    pub lb_algorithm: Algorithm,
    pub health_monitor_id: Option<EntityId>,
    #[serde(default)]
    pub member_ids: Vec<EntityId>,
    pub provisioning_status: ProvisioningStatus,
    pub operating_status: OperatingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: EntityId,
    pub tenant_id: String,
    pub pool_id: EntityId,
    pub address: String,
    pub protocol_port: u16,
    pub weight: u32,
    pub enabled: bool,
    pub provisioning_status: ProvisioningStatus,
    pub operating_status: OperatingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitor {
    pub id: EntityId,
    pub tenant_id: String,
    pub pool_id: EntityId,
    #[serde(rename = "type")]
    pub monitor_type: MonitorType,
    pub delay: u32,
    pub timeout: u32,
    pub max_retries: u32,
    pub http_method: Option<String>,
    pub url_path: Option<String>,
    pub expected_codes: Option<String>,
    pub provisioning_status: ProvisioningStatus,
    pub operating_status: OperatingStatus,
}

// ── Assembled graphs ─────────────────────────────────────────────

/// A pool with the children the device needs to realize it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolTree {
    pub pool: Pool,
    pub members: Vec<Member>,
    pub health_monitor: Option<HealthMonitor>,
}

/// A load balancer with every descendant, as read from the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerTree {
    pub load_balancer: LoadBalancer,
    pub listeners: Vec<Listener>,
    pub pools: Vec<PoolTree>,
}

impl LoadBalancerTree {
    /// Listeners whose default pool is `pool`.
    pub fn listeners_of_pool<'a>(&'a self, pool: &'a EntityId) -> impl Iterator<Item = &'a Listener> {
        self.listeners
            .iter()
            .filter(move |l| l.default_pool_id.as_ref() == Some(pool))
    }

    pub fn pool(&self, id: &EntityId) -> Option<&PoolTree> {
        self.pools.iter().find(|p| &p.pool.id == id)
    }
}
