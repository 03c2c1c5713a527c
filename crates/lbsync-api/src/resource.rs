// ── Resource catalogue ──
//
// Static knowledge about each appliance resource type: its REST path,
// whether it lives inside a tenant scope, which business codes each action
// tolerates, and the attributes every CREATE must carry.

use std::fmt;

use reqwest::Method;
use serde_json::{Map, Value, json};
use url::form_urlencoded;

/// Flat JSON object sent to or read from the appliance.
pub type Fields = Map<String, Value>;

/// "Object already exists."
pub const CODE_EXISTS: i64 = -15;
/// "Object does not exist."
pub const CODE_ABSENT: i64 = -1;
/// "Real server already bound to the pool."
pub const CODE_MEMBER_EXISTS: i64 = -38;
/// "Duplicate static route."
pub const CODE_ROUTE_EXISTS: i64 = -1450;
/// "IP pool range overlaps an existing pool."
pub const CODE_IPPOOL_EXISTS: i64 = -1212;

/// CRUD verbs as the adapter sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    GetOne,
    GetAll,
}

impl Action {
    pub fn method(self) -> Method {
        match self {
            Self::Create => Method::POST,
            Self::Update => Method::PUT,
            Self::Delete => Method::DELETE,
            Self::GetOne | Self::GetAll => Method::GET,
        }
    }
}

/// Every appliance resource type the reconciler touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    GlobalSettings,
    Vdom,
    Interface,
    StaticRoute,
    NatPool,
    VirtualServer,
    Pool,
    RealServer,
    PoolMember,
    HealthCheck,
    VirtualServerStats,
}

impl ResourceKind {
    /// REST path below the appliance root.
    pub fn path(self) -> &'static str {
        match self {
            Self::GlobalSettings => "/api/system_global",
            Self::Vdom => "/api/vdom",
            Self::Interface => "/api/system_interface",
            Self::StaticRoute => "/api/router_static",
            Self::NatPool => "/api/load_balance_ippool",
            Self::VirtualServer => "/api/load_balance_virtual_server",
            Self::Pool => "/api/load_balance_pool",
            Self::RealServer => "/api/load_balance_real_server",
            Self::PoolMember => "/api/load_balance_pool_child_pool_member",
            Self::HealthCheck => "/api/system_health_check",
            Self::VirtualServerStats => "/api/status_history/vs",
        }
    }

    /// Whether requests for this kind carry a `vdom` query parameter.
    pub fn tenant_scoped(self) -> bool {
        !matches!(self, Self::GlobalSettings | Self::Vdom | Self::Interface)
    }

    /// Business codes that count as success for `action` on this kind.
    pub fn tolerated(self, action: Action) -> &'static [i64] {
        match (self, action) {
            (Self::PoolMember, Action::Create) => &[CODE_MEMBER_EXISTS],
            (Self::StaticRoute, Action::Create) => &[CODE_ROUTE_EXISTS, CODE_EXISTS],
            (Self::NatPool, Action::Create) => &[CODE_EXISTS, CODE_IPPOOL_EXISTS],
            (
                Self::Vdom
                | Self::VirtualServer
                | Self::Pool
                | Self::RealServer
                | Self::HealthCheck,
                Action::Create,
            ) => &[CODE_EXISTS],
            (_, Action::Delete | Action::GetOne) => &[CODE_ABSENT],
            _ => &[],
        }
    }

    /// Whether `GET ?mkey=` returns the object. Kinds without a by-id read
    /// are located by scanning the listing.
    pub fn supports_get_one(self) -> bool {
        !matches!(self, Self::RealServer | Self::PoolMember)
    }

    /// Attributes merged over every CREATE body of this kind.
    pub fn create_defaults(self) -> Fields {
        let v = match self {
            Self::Pool => json!({
                "pool_type": "ipv4",
                "health_check_realtionshiop": "AND",
                "rs_profile": "NONE",
            }),
            Self::RealServer => json!({
                "address6": "::",
            }),
            Self::PoolMember => json!({
                "status": "enable",
                "health_check_inherit": "enable",
                "m_health_check": "disable",
                "health_check_list": "",
                "m_health_check_realtionshio": "AND",
                "connlimit": "0",
                "recover": "0",
                "warmup": "0",
                "warmrate": "100",
                "connection-rate-limit": "0",
                "ssl": "disable",
                "rs_profile_inherit": "enable",
                "backup": "disable",
                "hc_status": "1",
                "mysql_group_id": "0",
                "mysql_read_only": "disable",
                "cookie": "",
                "address": "0.0.0.0",
                "address6": "::",
            }),
            Self::VirtualServer => json!({
                "addr-type": "ipv4",
                "address6": "",
                "protocol": "",
                "content-routing": "disable",
                "content-rewriting": "",
                "error-msg": "",
                "warmup": "0",
                "warmrate": "100",
                "connection-rate-limit": "0",
                "traffic-log": "disable",
                "alone": "enable",
                "trans-rate-limit": "",
                "scripting_flag": "",
                "ssl-mirror": "disable",
                "content-routing-list": "",
                "content-rewriting-list": "",
                "scripting_list": "",
                "comments": "",
                "traffic-group": "default",
                "ssl-mirror-intf": "",
                "error-page": "",
                "waf-profile": "",
                "auth_policy": "",
                "l2-exception-list": "",
                "pagespeed": "",
            }),
            Self::HealthCheck => json!({
                "down_retry": "1",
                "dest_addr_type": "ipv4",
                "dest_addr": "0.0.0.0",
                "dest_addr6": "::",
                "receive_string": "receive-string",
                "match_type": "match_string",
                "addr_type": "ipv4",
                "host_addr6": "::",
                "hostname": "",
                "http_connect": "no_connect",
                "allow-ssl-version": ["tlsv1.0", "tlsv1.1", "tlsv1.2"],
                "local-cert": "",
                "rtsp-method-type": "options",
                "mysql-server-type": "master",
                "radius-reject": "disable",
            }),
            Self::Vdom => json!({
                "concurrentsession": "",
                "ep": "",
                "hc": "",
                "l4cps": "",
                "l7cps": "",
                "l7rps": "",
                "lu": "",
                "rs": "",
                "sp": "",
                "sslcps": "",
                "sslthroughput": "",
                "ug": "",
                "vs": "",
            }),
            _ => Value::Object(Map::new()),
        };
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }
}

/// Read a field as text; the appliance returns some numeric fields unquoted.
pub fn field_str(fields: &Fields, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Request paths ────────────────────────────────────────────────

/// Path plus query for one resource request:
/// `/api/<resource>?vdom=<tenant>&pkey=<parent>&mkey=<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    kind: ResourceKind,
    query: Vec<(&'static str, String)>,
}

impl ResourcePath {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            query: Vec::new(),
        }
    }

    /// A tenant-scoped path; global kinds ignore the tenant.
    pub fn scoped(kind: ResourceKind, tenant: &str) -> Self {
        let path = Self::new(kind);
        if kind.tenant_scoped() {
            path.vdom(tenant)
        } else {
            path
        }
    }

    pub fn vdom(self, tenant: &str) -> Self {
        self.param("vdom", tenant)
    }

    pub fn pkey(self, parent: &str) -> Self {
        self.param("pkey", parent)
    }

    pub fn mkey(self, key: &str) -> Self {
        self.param("mkey", key)
    }

    pub fn param(mut self, name: &'static str, value: &str) -> Self {
        self.query.push((name, value.to_owned()));
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Drop the instance key, e.g. to list the collection an object lives in.
    pub fn without_mkey(&self) -> Self {
        Self {
            kind: self.kind,
            query: self
                .query
                .iter()
                .filter(|(k, _)| *k != "mkey")
                .cloned()
                .collect(),
        }
    }

    pub fn mkey_value(&self) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| *k == "mkey")
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.path())?;
        if self.query.is_empty() {
            return Ok(());
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();
        write!(f, "?{query}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_member_path() {
        let path = ResourcePath::scoped(ResourceKind::PoolMember, "t1")
            .pkey("pool-a")
            .mkey("3");
        assert_eq!(
            path.to_string(),
            "/api/load_balance_pool_child_pool_member?vdom=t1&pkey=pool-a&mkey=3"
        );
        assert_eq!(
            path.without_mkey().to_string(),
            "/api/load_balance_pool_child_pool_member?vdom=t1&pkey=pool-a"
        );
    }

    #[test]
    fn global_kinds_ignore_tenant() {
        let path = ResourcePath::scoped(ResourceKind::Interface, "t1").mkey("port2");
        assert_eq!(path.to_string(), "/api/system_interface?mkey=port2");
    }

    #[test]
    fn tolerated_sets() {
        assert_eq!(
            ResourceKind::PoolMember.tolerated(Action::Create),
            &[CODE_MEMBER_EXISTS]
        );
        assert_eq!(ResourceKind::Pool.tolerated(Action::Delete), &[CODE_ABSENT]);
        assert!(ResourceKind::Pool.tolerated(Action::Update).is_empty());
    }
}
