//! Configuration for lbsync embedders.
//!
//! TOML device sections, credential resolution (env var + plaintext),
//! validation, and translation to `lbsync_core::OrchestratorConfig`.
//! Values merge in order: built-in defaults, the TOML file, then
//! `LBSYNC_`-prefixed environment variables (`__` separates nesting, e.g.
//! `LBSYNC_ENGINE__SWEEP_INTERVAL_SECS=30`).

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use lbsync_core::{
    DeviceProfile, EngineSettings, ListenerDefaults, OrchestratorConfig, RetryPolicy,
    TenantNetwork, TlsVerification,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for device '{device}'")]
    NoCredentials { device: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Named appliances.
    #[serde(default)]
    pub devices: BTreeMap<String, Device>,

    #[serde(default)]
    pub engine: Engine,
}

/// Settings every device inherits unless it overrides them.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Appliances usually present self-signed certificates.
    #[serde(default = "default_true")]
    pub insecure: bool,

    #[serde(default = "default_health_check_port")]
    pub health_check_port: String,

    #[serde(default = "default_stats_range")]
    pub stats_range: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            timeout_secs: default_timeout(),
            insecure: true,
            health_check_port: default_health_check_port(),
            stats_range: default_stats_range(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    3050
}
fn default_timeout() -> u64 {
    20
}
fn default_true() -> bool {
    true
}
fn default_health_check_port() -> String {
    "80".into()
}
fn default_stats_range() -> String {
    "1".into()
}
fn default_username() -> String {
    "admin".into()
}

/// One appliance and the tenants (projects) it serves.
#[derive(Debug, Deserialize, Serialize)]
pub struct Device {
    /// Appliance base URL (e.g., "https://10.20.0.5").
    pub url: String,

    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext password (prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override `defaults.insecure`.
    pub insecure: Option<bool>,

    /// Tenant ids served by this appliance.
    #[serde(default)]
    pub tenants: Vec<String>,

    /// Interfaces moved into every tenant scope.
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Static CIDR address per mapped interface.
    #[serde(default)]
    pub interface_ips: BTreeMap<String, String>,

    /// Allowed management protocols per mapped interface.
    #[serde(default)]
    pub allow_access: BTreeMap<String, String>,

    pub default_gateway: String,

    /// Shared ingress port whose allow-list carries the VIPs.
    pub vip_port_id: String,

    pub health_check_port: Option<String>,

    #[serde(default)]
    pub listener: ListenerSection,
}

/// Virtual server settings applied to every listener on the device.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ListenerSection {
    #[serde(default)]
    pub packet_forward_method: String,

    /// Full-NAT source range, "start-end".
    pub nat_pool: Option<String>,

    #[serde(default)]
    pub nat_interface: String,

    #[serde(default)]
    pub persistence: String,

    #[serde(default)]
    pub interface: String,
}

/// Orchestrator timers and retry budgets.
#[derive(Debug, Deserialize, Serialize)]
pub struct Engine {
    /// Zero disables the sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    #[serde(default = "default_token_refresh_interval")]
    pub token_refresh_interval_secs: u64,

    #[serde(default = "default_lookup_retry")]
    pub lookup_retry: Retry,

    #[serde(default = "default_device_retry")]
    pub device_retry: Retry,

    #[serde(default)]
    pub event_notifications: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            stats_interval_secs: default_stats_interval(),
            token_refresh_interval_secs: default_token_refresh_interval(),
            lookup_retry: default_lookup_retry(),
            device_retry: default_device_retry(),
            event_notifications: false,
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}
fn default_stats_interval() -> u64 {
    60
}
fn default_token_refresh_interval() -> u64 {
    300
}
fn default_lookup_retry() -> Retry {
    Retry {
        attempts: 5,
        step_ms: 500,
        max_ms: 5000,
    }
}
fn default_device_retry() -> Retry {
    Retry {
        attempts: 3,
        step_ms: 1000,
        max_ms: 5000,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Retry {
    pub attempts: u32,
    pub step_ms: u64,
    pub max_ms: u64,
}

impl From<Retry> for RetryPolicy {
    fn from(r: Retry) -> Self {
        RetryPolicy::new(
            r.attempts,
            Duration::from_millis(r.step_ms),
            Duration::from_millis(r.max_ms),
        )
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "lbsync", "lbsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("lbsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the canonical path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` plus environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LBSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a device password: the named env var first, then plaintext.
pub fn resolve_password(device: &Device, name: &str) -> Result<SecretString, ConfigError> {
    resolve_password_with(device, name, |var| std::env::var(var).ok())
}

/// [`resolve_password`] with an injectable environment lookup.
pub fn resolve_password_with(
    device: &Device,
    name: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    if let Some(ref var) = device.password_env {
        if let Some(val) = env(var) {
            return Ok(SecretString::from(val));
        }
    }

    if let Some(ref pw) = device.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        device: name.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_nat_range(name: &str, raw: &str) -> Result<(String, String), ConfigError> {
    let field = format!("devices.{name}.listener.nat_pool");
    let Some((start, end)) = raw.split_once('-') else {
        return Err(invalid(field, format!("expected 'start-end', got '{raw}'")));
    };
    let (start, end) = (start.trim(), end.trim());
    for addr in [start, end] {
        if addr.parse::<IpAddr>().is_err() {
            return Err(invalid(field, format!("'{addr}' is not an IP address")));
        }
    }
    Ok((start.to_owned(), end.to_owned()))
}

/// An explicit CA bundle always verifies, whatever `insecure` says.
fn tls_for(device: &Device, defaults: &Defaults) -> TlsVerification {
    if let Some(ref ca) = device.ca_cert {
        TlsVerification::CustomCa(ca.clone())
    } else if device.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else {
        TlsVerification::SystemDefaults
    }
}

/// Build one `DeviceProfile`, resolving credentials through `env`.
pub fn device_profile(
    cfg: &Config,
    name: &str,
    device: &Device,
    env: impl Fn(&str) -> Option<String>,
) -> Result<DeviceProfile, ConfigError> {
    let url: Url = device
        .url
        .parse()
        .map_err(|_| invalid(format!("devices.{name}.url"), format!("invalid URL: {}", device.url)))?;

    let nat_pool = device
        .listener
        .nat_pool
        .as_deref()
        .map(|raw| parse_nat_range(name, raw))
        .transpose()?;

    Ok(DeviceProfile {
        name: name.to_owned(),
        url,
        username: device.username.clone(),
        password: resolve_password_with(device, name, env)?,
        tls: tls_for(device, &cfg.defaults),
        connect_timeout: Duration::from_millis(cfg.defaults.connect_timeout_ms),
        timeout: Duration::from_secs(cfg.defaults.timeout_secs),
        network: TenantNetwork {
            interfaces: device.interfaces.clone(),
            interface_ips: device.interface_ips.clone(),
            allow_access: device.allow_access.clone(),
            default_gateway: device.default_gateway.clone(),
        },
        listener: ListenerDefaults {
            packet_forward_method: device.listener.packet_forward_method.clone(),
            nat_pool,
            nat_interface: device.listener.nat_interface.clone(),
            persistence: device.listener.persistence.clone(),
            interface: device.listener.interface.clone(),
        },
        health_check_port: device
            .health_check_port
            .clone()
            .unwrap_or_else(|| cfg.defaults.health_check_port.clone()),
        stats_range: cfg.defaults.stats_range.clone(),
        vip_port_id: device.vip_port_id.clone(),
    })
}

/// Translate to a validated `OrchestratorConfig`.
pub fn to_orchestrator_config(cfg: &Config) -> Result<OrchestratorConfig, ConfigError> {
    to_orchestrator_config_with(cfg, |var| std::env::var(var).ok())
}

/// [`to_orchestrator_config`] with an injectable environment lookup.
pub fn to_orchestrator_config_with(
    cfg: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<OrchestratorConfig, ConfigError> {
    if cfg.devices.is_empty() {
        return Err(invalid("devices", "at least one device is required"));
    }

    let mut out = OrchestratorConfig {
        engine: engine_settings(&cfg.engine),
        ..OrchestratorConfig::default()
    };

    for (name, device) in &cfg.devices {
        out.devices
            .insert(name.clone(), device_profile(cfg, name, device, &env)?);
        for tenant in &device.tenants {
            if let Some(other) = out.tenants.insert(tenant.clone(), name.clone()) {
                return Err(invalid(
                    format!("devices.{name}.tenants"),
                    format!("tenant {tenant} is already served by {other}"),
                ));
            }
        }
    }

    out.validate()
        .map_err(|e| invalid("devices", e.to_string()))?;
    Ok(out)
}

fn engine_settings(engine: &Engine) -> EngineSettings {
    EngineSettings {
        sweep_interval: Duration::from_secs(engine.sweep_interval_secs),
        stats_interval: Duration::from_secs(engine.stats_interval_secs),
        token_refresh_interval: Duration::from_secs(engine.token_refresh_interval_secs),
        lookup_retry: engine.lookup_retry.into(),
        device_retry: engine.device_retry.into(),
        event_notifications: engine.event_notifications,
    }
}
