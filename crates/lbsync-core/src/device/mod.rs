// ── Device driver ──
//
// One driver per appliance. Wraps the REST adapter with the device profile
// and implements tenant isolation and hierarchy sync on top of it.

pub mod convert;
mod hierarchy;
mod ports;
mod tenant;

pub use ports::{MemoryPortDirectory, PortDirectory, VipAllowList};

use std::sync::Arc;

use lbsync_api::{AdcClient, Connector, Credentials, TlsMode, TransportConfig};
use tokio::sync::OnceCell;

use crate::config::{DeviceProfile, TlsVerification};
use crate::error::CoreError;

pub struct DeviceDriver {
    profile: DeviceProfile,
    client: AdcClient,
    vips: Arc<VipAllowList>,
    firmware: OnceCell<String>,
    multi_tenancy: OnceCell<()>,
}

impl DeviceDriver {
    /// Build a driver. No request is sent until the first device call.
    pub fn new(profile: DeviceProfile, vips: Arc<VipAllowList>) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: match &profile.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            connect_timeout: profile.connect_timeout,
            timeout: profile.timeout,
        };
        let credentials = Credentials {
            username: profile.username.clone(),
            password: profile.password.clone(),
        };
        let connector = Connector::new(profile.url.clone(), credentials, &transport)?;
        Ok(Self {
            profile,
            client: AdcClient::new(connector),
            vips,
            firmware: OnceCell::new(),
            multi_tenancy: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn client(&self) -> &AdcClient {
        &self.client
    }

    pub fn connector(&self) -> &Connector {
        self.client.connector()
    }

    /// Firmware version, read once per driver. Appliances too old for
    /// token authentication fail with [`CoreError::Unsupported`].
    pub async fn firmware(&self) -> Result<&str, CoreError> {
        let version = self
            .firmware
            .get_or_try_init(|| async { self.connector().check_version().await })
            .await?;
        Ok(version.as_str())
    }
}

impl std::fmt::Debug for DeviceDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDriver")
            .field("name", &self.profile.name)
            .field("url", &self.profile.url.as_str())
            .finish_non_exhaustive()
    }
}
