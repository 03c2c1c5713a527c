// ── Resource hierarchy sync ──
//
// listener -> virtual server, pool -> server pool, member -> real server +
// pool membership, health monitor -> health check + pool check list.
// Children are removed before the objects they reference.

use lbsync_api::resource::field_str;
use lbsync_api::{Fields, Outcome, ResourceKind, ResourcePath, VsStats};
use serde_json::json;
use tracing::{debug, info, warn};

use super::DeviceDriver;
use super::convert::{self, NAT_POOL_NAME};
use crate::error::CoreError;
use crate::model::{HealthCheckSet, HealthMonitor, Listener, LoadBalancer, LoadBalancerTree, Member, Pool};

impl DeviceDriver {
    // ── Listeners ────────────────────────────────────────────────────

    /// Create the virtual server for `listener`. Without a default pool
    /// there is nothing to forward to and the create is skipped.
    ///
    /// Returns `false` when skipped.
    pub async fn create_listener(
        &self,
        lb: &LoadBalancer,
        listener: &Listener,
        pool: Option<&Pool>,
    ) -> Result<bool, CoreError> {
        let Some(pool) = pool else {
            warn!(listener = %listener.id, "no default pool, virtual server not created");
            return Ok(false);
        };

        let nat_pool = if convert::needs_nat_pool(listener, &self.profile) {
            self.ensure_nat_pool(&listener.tenant_id).await?;
            Some(NAT_POOL_NAME)
        } else {
            None
        };

        let fields = convert::virtual_server_fields(lb, listener, pool, &self.profile, nat_pool)?;
        self.client
            .create_scoped(ResourceKind::VirtualServer, &listener.tenant_id, fields)
            .await?;
        info!(tenant = %listener.tenant_id, listener = %listener.id, "virtual server created");
        Ok(true)
    }

    /// Re-apply the virtual server for `listener`. Skipped without a pool.
    pub async fn update_listener(
        &self,
        lb: &LoadBalancer,
        listener: &Listener,
        pool: Option<&Pool>,
    ) -> Result<bool, CoreError> {
        let Some(pool) = pool else {
            warn!(listener = %listener.id, "no default pool, virtual server not updated");
            return Ok(false);
        };
        let nat_pool = convert::needs_nat_pool(listener, &self.profile).then_some(NAT_POOL_NAME);
        let fields = convert::virtual_server_fields(lb, listener, pool, &self.profile, nat_pool)?;
        self.client
            .update_scoped(
                ResourceKind::VirtualServer,
                &listener.tenant_id,
                listener.id.as_str(),
                fields,
            )
            .await?;
        Ok(true)
    }

    pub async fn delete_listener(&self, listener: &Listener) -> Result<(), CoreError> {
        let outcome = self
            .client
            .delete_scoped(
                ResourceKind::VirtualServer,
                &listener.tenant_id,
                listener.id.as_str(),
            )
            .await?;
        log_absent(&outcome, "virtual server", listener.id.as_str());
        Ok(())
    }

    /// Structured existence check for the virtual server of a listener.
    pub async fn virtual_server_exists(&self, tenant: &str, listener: &str) -> Result<bool, CoreError> {
        let path = ResourcePath::scoped(ResourceKind::VirtualServer, tenant).mkey(listener);
        Ok(self.client.exists(&path).await?)
    }

    async fn ensure_nat_pool(&self, tenant: &str) -> Result<(), CoreError> {
        let defaults = &self.profile.listener;
        let Some((start, end)) = &defaults.nat_pool else {
            return Ok(());
        };
        self.client
            .create_nat_pool(tenant, NAT_POOL_NAME, (start, end), &defaults.nat_interface)
            .await?;
        debug!(tenant, "full-NAT pool ensured");
        Ok(())
    }

    // ── Pools ────────────────────────────────────────────────────────

    pub async fn create_pool(&self, pool: &Pool) -> Result<(), CoreError> {
        self.client
            .create_scoped(
                ResourceKind::Pool,
                &pool.tenant_id,
                convert::pool_create_fields(pool),
            )
            .await?;
        info!(tenant = %pool.tenant_id, pool = %pool.id, "pool created");
        Ok(())
    }

    pub async fn update_pool(&self, pool: &Pool) -> Result<(), CoreError> {
        self.client
            .update_scoped(
                ResourceKind::Pool,
                &pool.tenant_id,
                pool.id.as_str(),
                convert::pool_update_fields(pool),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_pool(&self, pool: &Pool) -> Result<(), CoreError> {
        let outcome = self
            .client
            .delete_scoped(ResourceKind::Pool, &pool.tenant_id, pool.id.as_str())
            .await?;
        log_absent(&outcome, "pool", pool.id.as_str());
        Ok(())
    }

    // ── Members ──────────────────────────────────────────────────────

    /// Real server first, then the membership unless the (server, port)
    /// pair is already bound into the pool.
    pub async fn create_member(&self, member: &Member) -> Result<(), CoreError> {
        let tenant = &member.tenant_id;
        let pool = member.pool_id.as_str();

        self.client
            .create_scoped(
                ResourceKind::RealServer,
                tenant,
                convert::real_server_fields(member),
            )
            .await?;

        let bound = self
            .client
            .find_pool_member(tenant, pool, member.id.as_str(), Some(member.protocol_port))
            .await?;
        if bound.is_some() {
            debug!(member = %member.id, pool, "membership already present");
            return Ok(());
        }
        self.client
            .create_pool_member(tenant, pool, convert::membership_fields(member))
            .await?;
        info!(tenant = %tenant, member = %member.id, pool, "member created");
        Ok(())
    }

    /// Update the real server, then merge the membership if present or
    /// bind it if missing.
    pub async fn update_member(&self, member: &Member) -> Result<(), CoreError> {
        let tenant = &member.tenant_id;
        let pool = member.pool_id.as_str();

        self.client
            .update_scoped(
                ResourceKind::RealServer,
                tenant,
                member.id.as_str(),
                convert::real_server_fields(member),
            )
            .await?;

        let updated = self
            .client
            .update_pool_member(tenant, pool, member.id.as_str(), convert::membership_fields(member))
            .await?;
        if updated.is_none() {
            debug!(member = %member.id, pool, "membership missing, binding it");
            self.client
                .create_pool_member(tenant, pool, convert::membership_fields(member))
                .await?;
        }
        Ok(())
    }

    /// Membership first, then the real server.
    pub async fn delete_member(&self, member: &Member) -> Result<(), CoreError> {
        let tenant = &member.tenant_id;
        let pool = member.pool_id.as_str();

        if self
            .client
            .delete_pool_member(tenant, pool, member.id.as_str())
            .await?
            .is_none()
        {
            debug!(member = %member.id, pool, "membership already absent");
        }
        let outcome = self
            .client
            .delete_scoped(ResourceKind::RealServer, tenant, member.id.as_str())
            .await?;
        log_absent(&outcome, "real server", member.id.as_str());
        Ok(())
    }

    // ── Health monitors ──────────────────────────────────────────────

    pub async fn create_health_monitor(&self, hm: &HealthMonitor) -> Result<(), CoreError> {
        let fields = convert::health_check_fields(hm, &self.profile)?;
        self.client
            .create_scoped(ResourceKind::HealthCheck, &hm.tenant_id, fields)
            .await?;
        self.attach_health_check(&hm.tenant_id, hm.pool_id.as_str(), hm.id.as_str())
            .await
    }

    pub async fn update_health_monitor(&self, hm: &HealthMonitor) -> Result<(), CoreError> {
        let fields = convert::health_check_fields(hm, &self.profile)?;
        self.client
            .update_scoped(
                ResourceKind::HealthCheck,
                &hm.tenant_id,
                hm.id.as_str(),
                fields,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_health_monitor(&self, hm: &HealthMonitor) -> Result<(), CoreError> {
        match self
            .detach_health_check(&hm.tenant_id, hm.pool_id.as_str(), hm.id.as_str())
            .await
        {
            Err(CoreError::NotFound { .. }) => {
                debug!(pool = %hm.pool_id, "pool gone, nothing to detach");
            }
            other => other?,
        }
        let outcome = self
            .client
            .delete_scoped(ResourceKind::HealthCheck, &hm.tenant_id, hm.id.as_str())
            .await?;
        log_absent(&outcome, "health check", hm.id.as_str());
        Ok(())
    }

    /// Add `check` to the pool's check list and switch checking on.
    pub async fn attach_health_check(&self, tenant: &str, pool: &str, check: &str) -> Result<(), CoreError> {
        let (path, current) = self.fetch_pool(tenant, pool).await?;
        let mut checks = current_checks(&current);
        checks.insert(check);

        let mut patch = Fields::new();
        patch.insert("health_check".into(), json!("enable"));
        patch.insert("health_check_list".into(), json!(checks.to_device_string()));
        self.client.put_merged(&path, current, patch).await?;
        debug!(tenant, pool, check, checks = %checks, "health check attached");
        Ok(())
    }

    /// Remove `check` from the pool's check list. Checking is switched off
    /// only when no other check remains.
    pub async fn detach_health_check(&self, tenant: &str, pool: &str, check: &str) -> Result<(), CoreError> {
        let (path, current) = self.fetch_pool(tenant, pool).await?;
        let mut checks = current_checks(&current);
        if !checks.remove(check) {
            debug!(tenant, pool, check, "health check not attached");
            return Ok(());
        }

        let mut patch = Fields::new();
        patch.insert("health_check_list".into(), json!(checks.to_device_string()));
        if checks.is_empty() {
            patch.insert("health_check".into(), json!("disable"));
        }
        self.client.put_merged(&path, current, patch).await?;
        debug!(tenant, pool, check, checks = %checks, "health check detached");
        Ok(())
    }

    async fn fetch_pool(&self, tenant: &str, pool: &str) -> Result<(ResourcePath, Fields), CoreError> {
        let path = ResourcePath::scoped(ResourceKind::Pool, tenant).mkey(pool);
        let Some(current) = self.client.get_one(&path).await? else {
            return Err(CoreError::NotFound {
                entity_type: ResourceKind::Pool.to_string(),
                identifier: pool.to_owned(),
            });
        };
        Ok((path, current))
    }

    // ── Statistics ───────────────────────────────────────────────────

    /// Traffic of every virtual server under `tree`, summed.
    pub async fn load_balancer_stats(&self, tree: &LoadBalancerTree) -> Result<VsStats, CoreError> {
        let tenant = &tree.load_balancer.tenant_id;
        let mut total = VsStats::default();
        for listener in &tree.listeners {
            match self
                .client
                .virtual_server_stats(tenant, listener.id.as_str(), &self.profile.stats_range)
                .await
            {
                Ok(stats) => total += stats,
                Err(e) if e.is_not_found() => {
                    debug!(listener = %listener.id, "no statistics for virtual server");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }
}

fn current_checks(pool: &Fields) -> HealthCheckSet {
    field_str(pool, "health_check_list")
        .map(|raw| HealthCheckSet::parse(&raw))
        .unwrap_or_default()
}

fn log_absent(outcome: &Outcome, what: &str, key: &str) {
    if outcome.is_tolerated() {
        debug!(key, "{what} already absent");
    }
}
