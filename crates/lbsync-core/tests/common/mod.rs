// Shared fixtures for the orchestrator integration tests.
//
// `FakeAdc` is a stateful stand-in for the appliance REST surface: it keeps
// every object it is sent, answers with the device envelope and business
// codes, and records each call so tests can assert on order and counts.

#![allow(clippy::unwrap_used, dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use url::Url;
use wiremock::matchers::path_regex;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use lbsync_core::config::{
    DeviceProfile, EngineSettings, ListenerDefaults, OrchestratorConfig, TenantNetwork,
    TlsVerification,
};
use lbsync_core::{
    Algorithm, EntityId, HealthMonitor, Listener, LoadBalancer, MemoryPortDirectory,
    MemoryStateStore, Member, MonitorType, OperatingStatus, Orchestrator, Pool, Protocol,
    ProvisioningStatus, RetryPolicy,
};

pub const TENANT: &str = "t1";
pub const DEVICE: &str = "adc1";
pub const VIP_PORT: &str = "vip-port";

pub const VS: &str = "load_balance_virtual_server";
pub const POOL: &str = "load_balance_pool";
pub const RS: &str = "load_balance_real_server";
pub const MEMBER: &str = "load_balance_pool_child_pool_member";
pub const HC: &str = "system_health_check";
pub const VDOM: &str = "vdom";
pub const INTF: &str = "system_interface";
pub const ROUTE: &str = "router_static";
pub const GLOBAL: &str = "system_global";
pub const NAT_POOL: &str = "load_balance_ippool";

const CODE_ABSENT: i64 = -1;
const CODE_EXISTS: i64 = -15;
const CODE_MEMBER_EXISTS: i64 = -38;
const CODE_ROUTE_EXISTS: i64 = -1450;
const CODE_VDOM_IN_USE: i64 = -402;

// ── Fake appliance ──────────────────────────────────────────────────

/// One recorded REST call (authentication calls excluded).
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub resource: String,
    pub vdom: Option<String>,
    pub pkey: Option<String>,
    pub mkey: Option<String>,
    pub body: Option<Value>,
}

impl Call {
    pub fn is(&self, method: &str, resource: &str) -> bool {
        self.method == method && self.resource == resource
    }
}

/// Objects live per (resource, vdom, pkey) scope, in insertion order.
type Scope = (String, String, String);

#[derive(Default)]
struct DeviceState {
    objects: BTreeMap<Scope, Vec<Map<String, Value>>>,
    global: Map<String, Value>,
    calls: Vec<Call>,
    failures: HashMap<(String, String), i64>,
    absent_listings: HashSet<String>,
    firmware: String,
    version_checks: usize,
    block_vdom_delete: bool,
    delay: Option<Duration>,
    logins: usize,
    next_key: u64,
}

#[derive(Clone, Default)]
pub struct FakeAdc {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeAdc {
    /// Start a mock server backed by a fresh fake appliance with `port1`
    /// and `port2` in the root scope and multi-tenancy off.
    pub async fn start() -> (MockServer, Self) {
        let fake = Self::default();
        {
            let mut s = fake.state.lock().unwrap();
            s.global.insert("vdom-admin".into(), json!("disable"));
            s.global.insert("hostname".into(), json!("adc-test"));
            s.firmware = "5.2-0".into();
            let intfs = scope(INTF, "", "");
            for name in ["port1", "port2"] {
                s.objects.entry(intfs.clone()).or_default().push(object(json!({
                    "mkey": name,
                    "vdom": "root",
                    "ip": "0.0.0.0/0",
                    "mode": "static",
                    "allowaccess": "",
                })));
            }
        }

        let server = MockServer::start().await;
        Mock::given(path_regex("^/api/"))
            .respond_with(fake.clone())
            .mount(&server)
            .await;
        (server, fake)
    }

    // ── Fault injection ──

    /// Answer every `method` on `resource` with business code `code`.
    pub fn fail(&self, method: &str, resource: &str, code: i64) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((method.to_owned(), resource.to_owned()), code);
    }

    /// Answer listings of `resource` (GET without `mkey`) with the absent
    /// code, as the appliance does once the enclosing scope is gone.
    pub fn absent_listing(&self, resource: &str) {
        self.state
            .lock()
            .unwrap()
            .absent_listings
            .insert(resource.to_owned());
    }

    pub fn heal(&self) {
        let mut s = self.state.lock().unwrap();
        s.failures.clear();
        s.absent_listings.clear();
    }

    /// Firmware version reported by `/api/platform/version`.
    pub fn set_firmware(&self, version: &str) {
        self.state.lock().unwrap().firmware = version.to_owned();
    }

    /// Refuse VDOM deletion as a scope with dependents would.
    pub fn block_vdom_delete(&self, blocked: bool) {
        self.state.lock().unwrap().block_vdom_delete = blocked;
    }

    /// Hold every REST answer for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    /// Drop an object behind the orchestrator's back.
    pub fn remove(&self, resource: &str, vdom: &str, pkey: &str, mkey: &str) -> bool {
        let mut s = self.state.lock().unwrap();
        let Some(list) = s.objects.get_mut(&scope(resource, vdom, pkey)) else {
            return false;
        };
        let before = list.len();
        list.retain(|o| key_of(o).as_deref() != Some(mkey));
        before != list.len()
    }

    // ── Inspection ──

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, method: &str, resource: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.is(method, resource))
            .collect()
    }

    pub fn count(&self, method: &str, resource: &str) -> usize {
        self.calls_to(method, resource).len()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn logins(&self) -> usize {
        self.state.lock().unwrap().logins
    }

    pub fn version_checks(&self) -> usize {
        self.state.lock().unwrap().version_checks
    }

    pub fn objects(&self, resource: &str, vdom: &str, pkey: &str) -> Vec<Map<String, Value>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&scope(resource, vdom, pkey))
            .cloned()
            .unwrap_or_default()
    }

    pub fn object(&self, resource: &str, vdom: &str, pkey: &str, mkey: &str) -> Option<Map<String, Value>> {
        self.objects(resource, vdom, pkey)
            .into_iter()
            .find(|o| key_of(o).as_deref() == Some(mkey))
    }

    pub fn global(&self) -> Map<String, Value> {
        self.state.lock().unwrap().global.clone()
    }

    pub fn vdoms(&self) -> Vec<String> {
        self.objects(VDOM, "", "")
            .iter()
            .filter_map(key_of)
            .collect()
    }

    /// Index of the first recorded call matching the predicate.
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }
}

impl Respond for FakeAdc {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path();
        let method = request.method.as_str().to_owned();
        let mut s = self.state.lock().unwrap();

        match path {
            "/api/user/login" => {
                s.logins += 1;
                return ResponseTemplate::new(200).set_body_json(json!({ "token": "tok" }));
            }
            "/api/refresh_token" => {
                return ResponseTemplate::new(200).set_body_json(json!({ "token": "tok2" }));
            }
            "/api/user/logout" => return envelope(&method, json!(0)),
            "/api/platform/version" => {
                s.version_checks += 1;
                return ResponseTemplate::new(200)
                    .set_body_json(json!({ "payload": { "version": s.firmware.clone() } }));
            }
            _ => {}
        }

        let resource = path.trim_start_matches("/api/").to_owned();
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let body: Option<Value> = serde_json::from_slice(&request.body).ok();
        s.calls.push(Call {
            method: method.clone(),
            resource: resource.clone(),
            vdom: query.get("vdom").cloned(),
            pkey: query.get("pkey").cloned(),
            mkey: query.get("mkey").cloned(),
            body: body.clone(),
        });

        if let Some(code) = s.failures.get(&(method.clone(), resource.clone())) {
            return envelope(&method, json!(code));
        }
        if method == "GET" && !query.contains_key("mkey") && s.absent_listings.contains(&resource) {
            return envelope(&method, json!(CODE_ABSENT));
        }

        let vdom = query.get("vdom").cloned().unwrap_or_default();
        let pkey = query.get("pkey").cloned().unwrap_or_default();
        let mkey = query.get("mkey").cloned();
        let key = scope(&resource, &vdom, &pkey);

        let payload = match (method.as_str(), resource.as_str()) {
            ("GET", GLOBAL) => Value::Object(s.global.clone()),
            ("PUT", GLOBAL) => {
                if let Some(Value::Object(obj)) = body {
                    s.global = obj;
                }
                json!(0)
            }
            ("GET", "status_history/vs") => {
                let exists = mkey.as_deref().is_some_and(|vs| {
                    s.objects
                        .get(&scope(VS, &vdom, ""))
                        .is_some_and(|l| l.iter().any(|o| key_of(o).as_deref() == Some(vs)))
                });
                if exists {
                    json!({
                        "in_bytes": ["100", "50"],
                        "out_bytes": [200],
                        "current_sessions": ["3"],
                        "total_sessions": ["7", "1"],
                    })
                } else {
                    json!(CODE_ABSENT)
                }
            }
            ("DELETE", VDOM) if s.block_vdom_delete => json!(CODE_VDOM_IN_USE),
            ("GET", _) => {
                let list = s.objects.get(&key).cloned().unwrap_or_default();
                match mkey {
                    Some(k) => list
                        .into_iter()
                        .find(|o| key_of(o).as_deref() == Some(k.as_str()))
                        .map_or(json!(CODE_ABSENT), Value::Object),
                    None => Value::Array(list.into_iter().map(Value::Object).collect()),
                }
            }
            ("POST", _) => {
                let Some(Value::Object(mut obj)) = body else {
                    return ResponseTemplate::new(400);
                };
                s.next_key += 1;
                let auto = s.next_key.to_string();
                let list = s.objects.entry(key).or_default();
                let duplicate = match resource.as_str() {
                    MEMBER => list.iter().any(|o| {
                        o.get("real_server_id") == obj.get("real_server_id")
                            && o.get("port") == obj.get("port")
                    }),
                    ROUTE => list.iter().any(|o| o.get("gw") == obj.get("gw")),
                    _ => list.iter().any(|o| key_of(o) == key_of(&obj)),
                };
                if duplicate {
                    json!(match resource.as_str() {
                        MEMBER => CODE_MEMBER_EXISTS,
                        ROUTE => CODE_ROUTE_EXISTS,
                        _ => CODE_EXISTS,
                    })
                } else {
                    if key_of(&obj).is_none() {
                        obj.insert("mkey".into(), json!(auto));
                    }
                    list.push(obj);
                    json!(0)
                }
            }
            ("PUT", _) => {
                let (Some(k), Some(Value::Object(obj))) = (mkey, body) else {
                    return ResponseTemplate::new(400);
                };
                match s
                    .objects
                    .get_mut(&key)
                    .and_then(|l| l.iter_mut().find(|o| key_of(o).as_deref() == Some(k.as_str())))
                {
                    Some(slot) => {
                        *slot = obj;
                        slot.insert("mkey".into(), json!(k));
                        json!(0)
                    }
                    None => json!(CODE_ABSENT),
                }
            }
            ("DELETE", _) => {
                let Some(k) = mkey else {
                    return ResponseTemplate::new(400);
                };
                let list = s.objects.entry(key).or_default();
                let before = list.len();
                list.retain(|o| key_of(o).as_deref() != Some(k.as_str()));
                if list.len() == before {
                    json!(CODE_ABSENT)
                } else {
                    json!(0)
                }
            }
            _ => return ResponseTemplate::new(405),
        };
        match s.delay {
            Some(d) => envelope(&method, payload).set_delay(d),
            None => envelope(&method, payload),
        }
    }
}

fn envelope(method: &str, payload: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "status": "success",
        "http_status": 200,
        "http_method": method,
        "payload": payload,
    }))
}

fn scope(resource: &str, vdom: &str, pkey: &str) -> Scope {
    (resource.to_owned(), vdom.to_owned(), pkey.to_owned())
}

fn object(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

fn key_of(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("mkey")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Orchestrator harness ────────────────────────────────────────────

pub fn profile(uri: &str) -> DeviceProfile {
    DeviceProfile {
        name: DEVICE.into(),
        url: Url::parse(uri).unwrap(),
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
        vip_port_id: VIP_PORT.into(),
    }
}

pub fn config(uri: &str) -> OrchestratorConfig {
    OrchestratorConfig {
        devices: BTreeMap::from([(DEVICE.into(), profile(uri))]),
        tenants: BTreeMap::from([(TENANT.into(), DEVICE.into()), ("t2".into(), DEVICE.into())]),
        engine: EngineSettings {
            sweep_interval: Duration::ZERO,
            stats_interval: Duration::ZERO,
            token_refresh_interval: Duration::ZERO,
            lookup_retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(20)),
            device_retry: RetryPolicy::none(),
            event_notifications: true,
        },
    }
}

pub struct Harness {
    pub server: MockServer,
    pub fake: FakeAdc,
    pub state: Arc<MemoryStateStore>,
    pub ports: Arc<MemoryPortDirectory>,
    pub orch: Orchestrator,
}

impl Harness {
    pub async fn start() -> Self {
        let (server, fake) = FakeAdc::start().await;
        let state = Arc::new(MemoryStateStore::new());
        let ports = Arc::new(MemoryPortDirectory::new());
        let orch = Orchestrator::new(config(&server.uri()), state.clone(), ports.clone()).unwrap();
        Self {
            server,
            fake,
            state,
            ports,
            orch,
        }
    }

    pub fn status(&self, kind: lbsync_core::EntityKind, id: &str) -> Option<ProvisioningStatus> {
        self.state.provisioning_status(kind, &EntityId::from(id))
    }

    pub fn operating(&self, kind: lbsync_core::EntityKind, id: &str) -> Option<OperatingStatus> {
        self.state.operating_status(kind, &EntityId::from(id))
    }
}

// ── Entity fixtures ─────────────────────────────────────────────────

pub fn lb(id: &str, tenant: &str, vip: &str) -> LoadBalancer {
    LoadBalancer {
        id: id.into(),
        tenant_id: tenant.into(),
        name: format!("{id}-name"),
        vip_address: vip.into(),
        provisioning_status: ProvisioningStatus::PendingCreate,
        operating_status: OperatingStatus::Offline,
        listener_ids: Vec::new(),
        pool_ids: Vec::new(),
    }
}

pub fn listener(id: &str, lb: &str, port: u16, pool: Option<&str>) -> Listener {
    Listener {
        id: id.into(),
        tenant_id: TENANT.into(),
        load_balancer_id: lb.into(),
        protocol: Protocol::Http,
        protocol_port: port,
        connection_limit: -1,
        enabled: true,
        default_pool_id: pool.map(EntityId::from),
        provisioning_status: ProvisioningStatus::PendingCreate,
        operating_status: OperatingStatus::Offline,
    }
}

pub fn pool(id: &str, lb: &str, listener: Option<&str>) -> Pool {
    Pool {
        id: id.into(),
        tenant_id: TENANT.into(),
        load_balancer_id: lb.into(),
        listener_id: listener.map(EntityId::from),
        protocol: Protocol::Http,
        lb_algorithm: Algorithm::RoundRobin,
        health_monitor_id: None,
        member_ids: Vec::new(),
        provisioning_status: ProvisioningStatus::PendingCreate,
        operating_status: OperatingStatus::Offline,
    }
}

pub fn member(id: &str, pool: &str, address: &str, port: u16) -> Member {
    Member {
        id: id.into(),
        tenant_id: TENANT.into(),
        pool_id: pool.into(),
        address: address.into(),
        protocol_port: port,
        weight: 1,
        enabled: true,
        provisioning_status: ProvisioningStatus::PendingCreate,
        operating_status: OperatingStatus::Offline,
    }
}

pub fn monitor(id: &str, pool: &str) -> HealthMonitor {
    HealthMonitor {
        id: id.into(),
        tenant_id: TENANT.into(),
        pool_id: pool.into(),
        monitor_type: MonitorType::Http,
        delay: 5,
        timeout: 3,
        max_retries: 3,
        http_method: Some("GET".into()),
        url_path: Some("/health".into()),
        expected_codes: Some("200".into()),
        provisioning_status: ProvisioningStatus::PendingCreate,
        operating_status: OperatingStatus::Offline,
    }
}
