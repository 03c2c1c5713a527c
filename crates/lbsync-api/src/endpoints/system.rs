// System endpoints
//
// Global settings and tenant scope (VDOM) lifecycle.

use serde_json::json;
use tracing::{debug, info};

use crate::client::AdcClient;
use crate::error::Error;
use crate::resource::{Fields, ResourceKind, ResourcePath, field_str};
use crate::response::Outcome;

impl AdcClient {
    /// Enable multi-VDOM administration if it is off.
    ///
    /// `GET /api/system_global`, then `PUT` with `vdom-admin: enable`.
    /// Returns `true` when the setting was changed.
    pub async fn enable_multi_tenancy(&self) -> Result<bool, Error> {
        let path = ResourcePath::new(ResourceKind::GlobalSettings);
        let Some(global) = self.get_one(&path).await? else {
            return Err(Error::NotFound {
                resource: ResourceKind::GlobalSettings.to_string(),
                key: String::new(),
            });
        };

        if field_str(&global, "vdom-admin").as_deref() == Some("enable") {
            debug!("multi-tenant mode already enabled");
            return Ok(false);
        }

        let mut patch = Fields::new();
        patch.insert("vdom-admin".into(), json!("enable"));
        self.put_merged(&path, global, patch).await?;
        info!("enabled multi-tenant mode");
        Ok(true)
    }

    /// `POST /api/vdom` -- "already exists" is tolerated.
    pub async fn create_vdom(&self, name: &str) -> Result<Outcome, Error> {
        let mut fields = Fields::new();
        fields.insert("mkey".into(), json!(name));
        self.create(&ResourcePath::new(ResourceKind::Vdom), fields)
            .await
    }

    /// `DELETE /api/vdom?mkey=<name>`.
    ///
    /// Any refusal other than "already absent" means objects still live in
    /// the scope and surfaces as [`Error::DependencyExists`].
    pub async fn delete_vdom(&self, name: &str) -> Result<Outcome, Error> {
        let path = ResourcePath::new(ResourceKind::Vdom).mkey(name);
        match self.delete(&path).await {
            Err(Error::Device { code, .. }) => Err(Error::DependencyExists {
                message: format!("vdom {name} still has dependents (device code {code})"),
            }),
            Err(Error::HttpStatus { status, .. }) => Err(Error::DependencyExists {
                message: format!("vdom {name} still has dependents (HTTP {status})"),
            }),
            other => other,
        }
    }

    /// Names of every tenant scope on the appliance.
    pub async fn list_vdoms(&self) -> Result<Vec<String>, Error> {
        let all = self
            .get_all(&ResourcePath::new(ResourceKind::Vdom))
            .await?;
        Ok(all.iter().filter_map(|v| field_str(v, "mkey")).collect())
    }

    pub async fn vdom_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.list_vdoms().await?.iter().any(|v| v == name))
    }
}
