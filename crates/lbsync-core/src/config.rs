// ── Runtime device configuration ──
//
// These types describe *which* appliance serves a tenant and how tenant
// scopes are wired on it. They carry credentials and network layout but
// never touch disk: `lbsync-config` builds them and hands them in.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::engine::RetryPolicy;
use crate::error::CoreError;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs). Appliance default.
    #[default]
    DangerAcceptInvalid,
}

/// How each tenant scope is wired into the appliance network.
#[derive(Debug, Clone, Default)]
pub struct TenantNetwork {
    /// Interfaces moved into every tenant scope.
    pub interfaces: Vec<String>,
    /// Static address (CIDR) per mapped interface.
    pub interface_ips: BTreeMap<String, String>,
    /// Allowed management protocols per mapped interface, space-joined.
    pub allow_access: BTreeMap<String, String>,
    /// Next hop of the in-scope default route.
    pub default_gateway: String,
}

/// Virtual server settings the logical model does not carry.
#[derive(Debug, Clone, Default)]
pub struct ListenerDefaults {
    /// Packet forwarding method; empty means the device default.
    pub packet_forward_method: String,
    /// Full-NAT source range (start, end), used by TCP listeners only.
    pub nat_pool: Option<(String, String)>,
    pub nat_interface: String,
    pub persistence: String,
    pub interface: String,
}

/// One appliance and the wiring it applies to its tenants.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    pub tls: TlsVerification,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub network: TenantNetwork,
    pub listener: ListenerDefaults,
    /// Port probed by health checks.
    pub health_check_port: String,
    /// Sampling range passed to the statistics endpoint.
    pub stats_range: String,
    /// Shared ingress port whose allowed-address set carries every VIP.
    pub vip_port_id: String,
}

impl DeviceProfile {
    /// Reject profiles that would fail half-way through a tenant create.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |message: String| {
            Err(CoreError::Config {
                message: format!("device {}: {message}", self.name),
            })
        };

        if !matches!(self.url.scheme(), "http" | "https") {
            return fail(format!("unsupported URL scheme {}", self.url.scheme()));
        }
        if self.username.is_empty() {
            return fail("username is empty".into());
        }
        if self.network.interfaces.is_empty() {
            return fail("no interfaces mapped into tenant scopes".into());
        }
        for (intf, cidr) in &self.network.interface_ips {
            if !self.network.interfaces.contains(intf) {
                return fail(format!("address given for unmapped interface {intf}"));
            }
            if !is_cidr(cidr) {
                return fail(format!("interface {intf}: malformed address {cidr}"));
            }
        }
        for intf in self.network.allow_access.keys() {
            if !self.network.interfaces.contains(intf) {
                return fail(format!("access list given for unmapped interface {intf}"));
            }
        }
        if self.network.default_gateway.parse::<IpAddr>().is_err() {
            return fail(format!(
                "malformed default gateway {}",
                self.network.default_gateway
            ));
        }
        if let Some((start, end)) = &self.listener.nat_pool {
            if start.parse::<IpAddr>().is_err() || end.parse::<IpAddr>().is_err() {
                return fail(format!("malformed NAT range {start}-{end}"));
            }
            if self.listener.nat_interface.is_empty() {
                return fail("NAT range configured without a NAT interface".into());
            }
        }
        if self.vip_port_id.is_empty() {
            return fail("VIP ingress port id is empty".into());
        }
        Ok(())
    }
}

fn is_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u8>().is_ok_and(|p| p <= max)
}

/// Timers and policies for the orchestrator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Reconciliation sweep period. Zero disables the sweep.
    pub sweep_interval: Duration,
    /// Statistics collection period. Zero disables collection.
    pub stats_interval: Duration,
    /// Token refresh period per device. Zero disables refresh.
    pub token_refresh_interval: Duration,
    /// Retry applied to state-store lookups at request start.
    pub lookup_retry: RetryPolicy,
    /// Retry applied to device tasks on transient failures.
    pub device_retry: RetryPolicy,
    /// Broadcast lifecycle notifications after successful flows.
    pub event_notifications: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(60),
            token_refresh_interval: Duration::from_secs(300),
            lookup_retry: RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(5)),
            device_retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(5)),
            event_notifications: false,
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub devices: BTreeMap<String, DeviceProfile>,
    /// Tenant id -> device name.
    pub tenants: BTreeMap<String, String>,
    pub engine: EngineSettings,
}

impl OrchestratorConfig {
    pub fn device_for(&self, tenant: &str) -> Option<&DeviceProfile> {
        self.devices.get(self.tenants.get(tenant)?)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        for profile in self.devices.values() {
            profile.validate()?;
        }
        for (tenant, device) in &self.tenants {
            if !self.devices.contains_key(device) {
                return Err(CoreError::Config {
                    message: format!("tenant {tenant} mapped to unknown device {device}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn profile(url: &str) -> DeviceProfile {
        DeviceProfile {
            name: "adc1".into(),
            url: Url::parse(url).unwrap(),
            username: "admin".into(),
            password: "secret".to_string().into(),
            tls: TlsVerification::DangerAcceptInvalid,
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            network: TenantNetwork {
                interfaces: vec!["port2".into()],
                interface_ips: BTreeMap::from([("port2".into(), "10.20.2.206/24".into())]),
                allow_access: BTreeMap::from([("port2".into(), "http ping".into())]),
                default_gateway: "10.20.2.1".into(),
            },
            listener: ListenerDefaults::default(),
            health_check_port: "80".into(),
            stats_range: "1".into(),
            vip_port_id: "vip-port".into(),
        }
    }

    #[test]
    fn valid_profile_passes() {
        profile("https://adc.example").validate().unwrap();
    }

    #[test]
    fn rejects_address_for_unmapped_interface() {
        let mut p = profile("https://adc.example");
        p.network
            .interface_ips
            .insert("port9".into(), "10.0.0.1/24".into());
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_bad_cidr_and_nat_range() {
        let mut p = profile("https://adc.example");
        p.network
            .interface_ips
            .insert("port2".into(), "10.0.0.1".into());
        assert!(p.validate().is_err());

        let mut p = profile("https://adc.example");
        p.listener.nat_pool = Some(("10.0.0.1".into(), "nope".into()));
        p.listener.nat_interface = "port3".into();
        assert!(p.validate().is_err());
    }
}
