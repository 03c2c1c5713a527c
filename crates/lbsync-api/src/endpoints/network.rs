// Network endpoints
//
// Interface binding, in-scope default routes and full-NAT address pools.
// Interfaces are global objects; routes and NAT pools live inside a VDOM.

use serde_json::json;
use tracing::debug;

use crate::client::AdcClient;
use crate::error::Error;
use crate::resource::{Fields, ResourceKind, ResourcePath, field_str};
use crate::response::Outcome;

const ROOT_VDOM: &str = "root";
const UNASSIGNED_IP: &str = "0.0.0.0/0";

impl AdcClient {
    /// Move an interface into `tenant`, optionally assigning a static address.
    ///
    /// `PUT /api/system_interface?mkey=<name>`
    pub async fn attach_interface(
        &self,
        name: &str,
        tenant: &str,
        ip: Option<&str>,
    ) -> Result<Outcome, Error> {
        let mut fields = Fields::new();
        fields.insert("vdom".into(), json!(tenant));
        if let Some(ip) = ip {
            fields.insert("ip".into(), json!(ip));
            fields.insert("mode".into(), json!("static"));
        }
        debug!(interface = name, tenant, "attaching interface");
        self.update(&interface_path(name), fields).await
    }

    /// Return every interface bound to `tenant` to the root scope with an
    /// unassigned address. Returns the number of interfaces released.
    pub async fn detach_interfaces(&self, tenant: &str) -> Result<usize, Error> {
        let all = self
            .get_all_for_delete(&ResourcePath::new(ResourceKind::Interface))
            .await?;
        let mut released = 0;
        for intf in all {
            if field_str(&intf, "vdom").as_deref() != Some(tenant) {
                continue;
            }
            let Some(name) = field_str(&intf, "mkey") else {
                continue;
            };
            let mut fields = Fields::new();
            fields.insert("vdom".into(), json!(ROOT_VDOM));
            fields.insert("ip".into(), json!(UNASSIGNED_IP));
            debug!(interface = %name, tenant, "detaching interface");
            self.put_merged(&interface_path(&name), intf, fields).await?;
            released += 1;
        }
        Ok(released)
    }

    /// Set the management protocols allowed on an interface (space-joined).
    pub async fn set_allowaccess(&self, name: &str, access: &str) -> Result<Outcome, Error> {
        let mut fields = Fields::new();
        fields.insert("allowaccess".into(), json!(access));
        self.update(&interface_path(name), fields).await
    }

    /// `POST /api/router_static?vdom=<tenant>` for `0.0.0.0/0 via gw`.
    pub async fn create_default_route(&self, tenant: &str, gw: &str) -> Result<Outcome, Error> {
        let mut fields = Fields::new();
        fields.insert("dest".into(), json!("0.0.0.0/0"));
        fields.insert("gw".into(), json!(gw));
        fields.insert("distance".into(), json!("10"));
        self.create(&ResourcePath::scoped(ResourceKind::StaticRoute, tenant), fields)
            .await
    }

    /// Remove the default route through `gw`, if present.
    pub async fn delete_default_route(&self, tenant: &str, gw: &str) -> Result<Option<Outcome>, Error> {
        let listing = ResourcePath::scoped(ResourceKind::StaticRoute, tenant);
        let Some(route) = self.find_by_for_delete(&listing, "gw", gw).await? else {
            debug!(tenant, gw, "default route already absent");
            return Ok(None);
        };
        let Some(key) = field_str(&route, "mkey") else {
            return Ok(None);
        };
        self.delete(&listing.mkey(&key)).await.map(Some)
    }

    /// `POST /api/load_balance_ippool?vdom=<tenant>` for a source-NAT range.
    pub async fn create_nat_pool(
        &self,
        tenant: &str,
        name: &str,
        range: (&str, &str),
        interface: &str,
    ) -> Result<Outcome, Error> {
        let mut fields = Fields::new();
        fields.insert("pool_type".into(), json!("ipv4"));
        fields.insert("mkey".into(), json!(name));
        fields.insert("ip-start".into(), json!(range.0));
        fields.insert("ip-end".into(), json!(range.1));
        fields.insert("interface".into(), json!(interface));
        self.create(&ResourcePath::scoped(ResourceKind::NatPool, tenant), fields)
            .await
    }

    /// Delete every NAT pool in `tenant` bound to one of `interfaces`.
    pub async fn delete_nat_pools(&self, tenant: &str, interfaces: &[String]) -> Result<usize, Error> {
        let listing = ResourcePath::scoped(ResourceKind::NatPool, tenant);
        let mut removed = 0;
        for pool in self.get_all_for_delete(&listing).await? {
            let bound = field_str(&pool, "interface").is_some_and(|i| interfaces.contains(&i));
            if !bound {
                continue;
            }
            if let Some(key) = field_str(&pool, "mkey") {
                self.delete(&listing.clone().mkey(&key)).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn interface_path(name: &str) -> ResourcePath {
    ResourcePath::new(ResourceKind::Interface).mkey(name)
}
