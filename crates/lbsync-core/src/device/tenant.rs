// ── Tenant isolation ──
//
// Each tenant gets its own VDOM with the configured interfaces, management
// access and a default route. Teardown runs the same steps backwards and
// tolerates anything already gone, except a VDOM that still has dependents.

use lbsync_api::Error as ApiError;
use tracing::{debug, info, warn};

use super::DeviceDriver;
use super::convert::NAT_POOL_NAME;
use crate::error::CoreError;

impl DeviceDriver {
    /// Turn on multi-tenant mode once per driver.
    pub async fn ensure_multi_tenancy(&self) -> Result<(), CoreError> {
        self.multi_tenancy
            .get_or_try_init(|| async {
                let firmware = self.firmware().await?;
                let changed = self.client.enable_multi_tenancy().await?;
                debug!(device = self.name(), firmware, changed, "multi-tenant mode ensured");
                Ok::<_, CoreError>(())
            })
            .await?;
        Ok(())
    }

    pub async fn create_tenant(&self, tenant: &str) -> Result<(), CoreError> {
        let network = &self.profile.network;
        info!(device = self.name(), tenant, "creating tenant scope");

        self.client.create_vdom(tenant).await?;
        for intf in &network.interfaces {
            let ip = network.interface_ips.get(intf).map(String::as_str);
            self.client.attach_interface(intf, tenant, ip).await?;
        }
        for (intf, access) in &network.allow_access {
            self.client.set_allowaccess(intf, access).await?;
        }
        self.client
            .create_default_route(tenant, &network.default_gateway)
            .await?;
        Ok(())
    }

    pub async fn delete_tenant(&self, tenant: &str) -> Result<(), CoreError> {
        let network = &self.profile.network;
        info!(device = self.name(), tenant, "deleting tenant scope");

        if !self.client.vdom_exists(tenant).await? {
            debug!(tenant, "tenant scope already gone");
            return Ok(());
        }

        let mut bound = network.interfaces.clone();
        let nat_intf = &self.profile.listener.nat_interface;
        if !nat_intf.is_empty() && !bound.contains(nat_intf) {
            bound.push(nat_intf.clone());
        }
        let removed = self.client.delete_nat_pools(tenant, &bound).await?;
        debug!(tenant, removed, pool = NAT_POOL_NAME, "NAT pools removed");

        let released = self.client.detach_interfaces(tenant).await?;
        debug!(tenant, released, "interfaces returned to root");

        if self
            .client
            .delete_default_route(tenant, &network.default_gateway)
            .await?
            .is_none()
        {
            debug!(tenant, "no default route to remove");
        }

        match self.client.delete_vdom(tenant).await {
            Ok(_) => Ok(()),
            Err(e @ ApiError::DependencyExists { .. }) => {
                warn!(tenant, error = %e, "tenant scope still has dependents");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Add `vip` to the ingress port allow-list. Returns `false` if it was
    /// already there.
    pub async fn plug_vip(&self, vip: &str) -> Result<bool, CoreError> {
        self.vips.plug(&self.profile.vip_port_id, vip).await
    }

    /// Remove every occurrence of `vip` from the allow-list. Returns how
    /// many entries were dropped.
    pub async fn unplug_vip(&self, vip: &str) -> Result<usize, CoreError> {
        self.vips.unplug(&self.profile.vip_port_id, vip).await
    }
}
