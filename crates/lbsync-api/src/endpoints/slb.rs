// Server load balancing endpoints
//
// Virtual servers, pools, real servers, pool-child memberships, health
// checks and virtual server statistics. Field maps come from the caller;
// this module only knows paths, keys and how memberships are located.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::client::AdcClient;
use crate::error::Error;
use crate::resource::{Fields, ResourceKind, ResourcePath, field_str};
use crate::response::Outcome;

/// Traffic counters for one virtual server over a sampling range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VsStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub active_connections: u64,
    pub total_connections: u64,
}

impl std::ops::AddAssign for VsStats {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_in = self.bytes_in.saturating_add(rhs.bytes_in);
        self.bytes_out = self.bytes_out.saturating_add(rhs.bytes_out);
        self.active_connections = self.active_connections.saturating_add(rhs.active_connections);
        self.total_connections = self.total_connections.saturating_add(rhs.total_connections);
    }
}

impl AdcClient {
    // ── Scoped objects (virtual server, pool, real server, health check) ──

    /// Create a tenant-scoped object of `kind`. `fields` must carry `mkey`.
    pub async fn create_scoped(
        &self,
        kind: ResourceKind,
        tenant: &str,
        fields: Fields,
    ) -> Result<Outcome, Error> {
        self.create(&ResourcePath::scoped(kind, tenant), fields).await
    }

    /// Merge-update a tenant-scoped object of `kind`.
    pub async fn update_scoped(
        &self,
        kind: ResourceKind,
        tenant: &str,
        key: &str,
        fields: Fields,
    ) -> Result<Outcome, Error> {
        self.update(&ResourcePath::scoped(kind, tenant).mkey(key), fields)
            .await
    }

    pub async fn delete_scoped(
        &self,
        kind: ResourceKind,
        tenant: &str,
        key: &str,
    ) -> Result<Outcome, Error> {
        self.delete(&ResourcePath::scoped(kind, tenant).mkey(key))
            .await
    }

    pub async fn get_scoped(
        &self,
        kind: ResourceKind,
        tenant: &str,
        key: &str,
    ) -> Result<Option<Fields>, Error> {
        self.get_one(&ResourcePath::scoped(kind, tenant).mkey(key))
            .await
    }

    // ── Pool-child memberships ───────────────────────────────────────

    fn member_listing(tenant: &str, pool: &str) -> ResourcePath {
        ResourcePath::scoped(ResourceKind::PoolMember, tenant).pkey(pool)
    }

    /// `GET /api/load_balance_pool_child_pool_member?vdom=&pkey=<pool>`
    pub async fn list_pool_members(&self, tenant: &str, pool: &str) -> Result<Vec<Fields>, Error> {
        self.get_all(&Self::member_listing(tenant, pool)).await
    }

    /// Find the membership record binding `server_id` into `pool`.
    ///
    /// With `port` set, both the server id and the port must match.
    pub async fn find_pool_member(
        &self,
        tenant: &str,
        pool: &str,
        server_id: &str,
        port: Option<u16>,
    ) -> Result<Option<Fields>, Error> {
        Ok(self
            .list_pool_members(tenant, pool)
            .await?
            .into_iter()
            .find(|m| is_membership(m, server_id, port)))
    }

    /// Bind a real server into a pool. "Already a member" is tolerated.
    pub async fn create_pool_member(
        &self,
        tenant: &str,
        pool: &str,
        fields: Fields,
    ) -> Result<Outcome, Error> {
        self.create(&Self::member_listing(tenant, pool), fields)
            .await
    }

    /// Merge-update the membership of `server_id`, located by scanning the
    /// pool's listing. Returns `None` if no such membership exists.
    pub async fn update_pool_member(
        &self,
        tenant: &str,
        pool: &str,
        server_id: &str,
        fields: Fields,
    ) -> Result<Option<Outcome>, Error> {
        let Some(current) = self.find_pool_member(tenant, pool, server_id, None).await? else {
            return Ok(None);
        };
        let Some(key) = field_str(&current, "mkey") else {
            return Ok(None);
        };
        let path = Self::member_listing(tenant, pool).mkey(&key);
        self.put_merged(&path, current, fields).await.map(Some)
    }

    /// Remove the membership of `server_id`. Returns `None` if it was absent.
    pub async fn delete_pool_member(
        &self,
        tenant: &str,
        pool: &str,
        server_id: &str,
    ) -> Result<Option<Outcome>, Error> {
        let current = self
            .get_all_for_delete(&Self::member_listing(tenant, pool))
            .await?
            .into_iter()
            .find(|m| is_membership(m, server_id, None));
        let Some(current) = current else {
            debug!(tenant, pool, server_id, "membership already absent");
            return Ok(None);
        };
        let Some(key) = field_str(&current, "mkey") else {
            return Ok(None);
        };
        let path = Self::member_listing(tenant, pool).mkey(&key);
        self.delete(&path).await.map(Some)
    }

    // ── Statistics ───────────────────────────────────────────────────

    /// `GET /api/status_history/vs?vdom=&range=&mkey=`, summing each series.
    pub async fn virtual_server_stats(
        &self,
        tenant: &str,
        vs: &str,
        range: &str,
    ) -> Result<VsStats, Error> {
        let path = ResourcePath::scoped(ResourceKind::VirtualServerStats, tenant)
            .param("range", range)
            .mkey(vs);
        let Some(series) = self.get_one(&path).await? else {
            return Err(Error::NotFound {
                resource: ResourceKind::VirtualServer.to_string(),
                key: vs.to_owned(),
            });
        };
        Ok(VsStats {
            bytes_in: sum_series(&series, "in_bytes"),
            bytes_out: sum_series(&series, "out_bytes"),
            active_connections: sum_series(&series, "current_sessions"),
            total_connections: sum_series(&series, "total_sessions"),
        })
    }
}

/// With `port` set, both the server id and the port must match.
fn is_membership(record: &Fields, server_id: &str, port: Option<u16>) -> bool {
    field_str(record, "real_server_id").as_deref() == Some(server_id)
        && port.is_none_or(|p| field_str(record, "port").as_deref() == Some(p.to_string().as_str()))
}

/// Sum a series whose samples may be numbers or numeric strings.
fn sum_series(fields: &Fields, key: &str) -> u64 {
    let Some(Value::Array(samples)) = fields.get(key) else {
        return 0;
    };
    samples
        .iter()
        .filter_map(|s| match s {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .fold(0, u64::saturating_add)
}
