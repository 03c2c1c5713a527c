// ── Logical model → device field maps ──
//
// Pure functions producing the owned attributes of each device object.
// Static defaults are overlaid by the adapter on create; everything else
// on the device is preserved by merge on update.

use lbsync_api::Fields;
use serde_json::json;

use crate::config::DeviceProfile;
use crate::error::CoreError;
use crate::model::{Algorithm, HealthMonitor, Listener, LoadBalancer, Member, MonitorType, Pool, Protocol};

/// Name of the per-tenant full-NAT source pool.
pub const NAT_POOL_NAME: &str = "lbsync_fullnat";

const CLIENT_SSL_PROFILE: &str = "LB_CLIENT_SSL_PROF_DEFAULT";

fn profile_for(protocol: Protocol) -> Option<&'static str> {
    match protocol {
        Protocol::Http => Some("LB_PROF_HTTP"),
        Protocol::Https | Protocol::TerminatedHttps => Some("LB_PROF_HTTPS"),
        Protocol::Tcp => Some("LB_PROF_TCP"),
        Protocol::Udp | Protocol::Proxy => None,
    }
}

fn vs_type_for(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => "l4-load-balance",
        _ => "l7-load-balance",
    }
}

fn method_for(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::LeastConnections => "LB_METHOD_LEAST_CONNECTION",
        Algorithm::RoundRobin | Algorithm::SourceIp => "LB_METHOD_ROUND_ROBIN",
    }
}

fn enable(flag: bool) -> &'static str {
    if flag { "enable" } else { "disable" }
}

/// Whether creating this listener also needs the tenant's full-NAT pool.
pub fn needs_nat_pool(listener: &Listener, profile: &DeviceProfile) -> bool {
    listener.protocol == Protocol::Tcp
        && !profile.listener.packet_forward_method.is_empty()
        && profile.listener.nat_pool.is_some()
}

/// Virtual server realizing `listener`, forwarding to `pool`.
pub fn virtual_server_fields(
    lb: &LoadBalancer,
    listener: &Listener,
    pool: &Pool,
    profile: &DeviceProfile,
    nat_pool: Option<&str>,
) -> Result<Fields, CoreError> {
    let Some(lb_profile) = profile_for(listener.protocol) else {
        return Err(CoreError::Unsupported {
            operation: format!("{} listener", listener.protocol),
        });
    };
    let defaults = &profile.listener;

    let mut f = Fields::new();
    f.insert("mkey".into(), json!(listener.id.as_str()));
    f.insert("status".into(), json!(enable(listener.enabled)));
    f.insert("type".into(), json!(vs_type_for(listener.protocol)));
    f.insert("address".into(), json!(lb.vip_address));
    f.insert("port".into(), json!(listener.protocol_port.to_string()));
    f.insert(
        "connection-limit".into(),
        json!(listener.connection_limit.max(0).to_string()),
    );
    f.insert("interface".into(), json!(defaults.interface));
    f.insert("profile".into(), json!(lb_profile));
    f.insert("persistence".into(), json!(defaults.persistence));
    f.insert("method".into(), json!(method_for(pool.lb_algorithm)));
    f.insert("pool".into(), json!(pool.id.as_str()));
    f.insert("packet-fwd-method".into(), json!(defaults.packet_forward_method));
    f.insert("source-pool-list".into(), json!(nat_pool.unwrap_or_default()));
    let ssl = if listener.protocol == Protocol::Https {
        CLIENT_SSL_PROFILE
    } else {
        ""
    };
    f.insert("client_ssl_profile".into(), json!(ssl));
    Ok(f)
}

/// Pool attributes set on create. Health-check fields start cleared and
/// are only ever changed through attach/detach afterwards.
pub fn pool_create_fields(pool: &Pool) -> Fields {
    let mut f = pool_update_fields(pool);
    f.insert("health_check".into(), json!("disable"));
    f.insert("health_check_list".into(), json!(""));
    f
}

pub fn pool_update_fields(pool: &Pool) -> Fields {
    let mut f = Fields::new();
    f.insert("mkey".into(), json!(pool.id.as_str()));
    f
}

pub fn real_server_fields(member: &Member) -> Fields {
    let mut f = Fields::new();
    f.insert("mkey".into(), json!(member.id.as_str()));
    f.insert("address".into(), json!(member.address));
    f.insert("status".into(), json!(enable(member.enabled)));
    f
}

pub fn membership_fields(member: &Member) -> Fields {
    let mut f = Fields::new();
    f.insert("real_server_id".into(), json!(member.id.as_str()));
    f.insert("port".into(), json!(member.protocol_port.to_string()));
    f.insert("weight".into(), json!(member.weight.to_string()));
    f
}

/// Health check realizing `hm`, after rejecting monitors the device
/// cannot express.
pub fn health_check_fields(hm: &HealthMonitor, profile: &DeviceProfile) -> Result<Fields, CoreError> {
    let kind = match hm.monitor_type {
        MonitorType::Http => "http",
        MonitorType::Https => "https",
        MonitorType::Ping => "icmp",
        MonitorType::Tcp => "tcp",
        other => {
            return Err(CoreError::ValidationFailed {
                message: format!("health monitor type {other} is not supported"),
            });
        }
    };
    if hm.timeout >= hm.delay {
        return Err(CoreError::ValidationFailed {
            message: format!(
                "health monitor timeout {} must be less than delay {}",
                hm.timeout, hm.delay
            ),
        });
    }

    let is_http = matches!(hm.monitor_type, MonitorType::Http | MonitorType::Https);
    let method = hm.http_method.as_deref().unwrap_or("GET").to_ascii_uppercase();
    if is_http && !matches!(method.as_str(), "GET" | "HEAD") {
        return Err(CoreError::ValidationFailed {
            message: format!("HTTP method {method} is not supported by health checks"),
        });
    }

    let mut f = Fields::new();
    f.insert("mkey".into(), json!(hm.id.as_str()));
    f.insert("type".into(), json!(kind));
    f.insert("interval".into(), json!(hm.delay.to_string()));
    f.insert("timeout".into(), json!(hm.timeout.to_string()));
    f.insert("up_retry".into(), json!(hm.max_retries.to_string()));
    f.insert("port".into(), json!(profile.health_check_port));
    f.insert(
        "send_string".into(),
        json!(hm.url_path.as_deref().unwrap_or("/")),
    );
    f.insert(
        "status_code".into(),
        json!(hm.expected_codes.as_deref().unwrap_or("200")),
    );
    f.insert(
        "method_type".into(),
        json!(format!("http_{}", method.to_ascii_lowercase())),
    );
    Ok(f)
}
