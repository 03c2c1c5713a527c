// ── Device connector ──
//
// Owns the bearer-token session against one appliance: login, token
// refresh, logout and the raw request path every resource call goes through.
// The token is read lock-free on every call; login and refresh serialize on
// `auth_lock` and publish the new token atomically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;
use crate::response::DeviceResponse;
use crate::transport::TransportConfig;

const LOGIN_PATH: &str = "/api/user/login";
const LOGOUT_PATH: &str = "/api/user/logout";
const REFRESH_PATH: &str = "/api/refresh_token";
const VERSION_PATH: &str = "/api/platform/version";
const LOCKOUT_MARKER: &str = "Too many bad login attempts";

/// Oldest firmware major version that speaks the token API.
pub const MIN_MAJOR_VERSION: u32 = 5;

/// Admin credentials for the appliance.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Session state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Connected,
    TokenExpired,
}

// ── Connector ────────────────────────────────────────────────────

/// Session handle for one appliance.
///
/// Cheaply cloneable; every clone shares the token, the in-flight counter
/// and the state channel.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    token: ArcSwapOption<SecretString>,
    auth_lock: Mutex<()>,
    in_flight: AtomicUsize,
    needs_refresh: AtomicBool,
    state: watch::Sender<SessionState>,
}

/// Decrements the in-flight counter when a device call finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Connector {
    /// Create a connector. Does NOT log in -- call [`login()`](Self::login).
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let (state, _) = watch::channel(SessionState::Disconnected);
        Ok(Self {
            inner: Arc::new(ConnectorInner {
                http,
                base_url,
                credentials,
                token: ArcSwapOption::empty(),
                auth_lock: Mutex::new(()),
                in_flight: AtomicUsize::new(0),
                needs_refresh: AtomicBool::new(false),
                state,
            }),
        })
    }

    /// The appliance base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Subscribe to session state changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn has_token(&self) -> bool {
        self.inner.token.load().is_some()
    }

    /// Number of device calls currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn needs_refresh(&self) -> bool {
        self.inner.needs_refresh.load(Ordering::SeqCst)
    }

    /// Clear and return the "needs refresh" flag.
    pub fn take_needs_refresh(&self) -> bool {
        self.inner.needs_refresh.swap(false, Ordering::SeqCst)
    }

    fn url(&self, path_and_query: &str) -> Result<Url, Error> {
        Ok(self.inner.base_url.join(path_and_query)?)
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.inner.state.send(state);
    }

    // ── Authentication ───────────────────────────────────────────

    /// Authenticate and store the bearer token.
    ///
    /// The appliance signals bad credentials with a body starting `0`, and a
    /// lockout with a body starting `2` or the "too many attempts" text.
    pub async fn login(&self) -> Result<(), Error> {
        let _guard = self.inner.auth_lock.lock().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<(), Error> {
        self.set_state(SessionState::Authenticating);
        let url = self.url(LOGIN_PATH)?;
        debug!("POST {}", url);

        let creds = &self.inner.credentials;
        let body = json!({
            "username": creds.username,
            "password": creds.password.expose_secret(),
        });

        let result = async {
            let resp = self
                .inner
                .http
                .post(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&body)
                .send()
                .await
                .map_err(Error::Transport)?;
            let status = resp.status();
            let text = resp.text().await.map_err(Error::Transport)?;
            parse_login(status, &text)
        }
        .await;

        match result {
            Ok(token) => {
                self.inner.token.store(Some(Arc::new(token)));
                self.inner.needs_refresh.store(false, Ordering::SeqCst);
                self.set_state(SessionState::Connected);
                info!(user = %creds.username, "device login succeeded");
                Ok(())
            }
            Err(e) => {
                self.inner.token.store(None);
                self.set_state(SessionState::Disconnected);
                warn!(error = %e, "device login failed");
                Err(e)
            }
        }
    }

    /// Log in if no token is held yet.
    pub async fn ensure_session(&self) -> Result<(), Error> {
        if self.has_token() {
            return Ok(());
        }
        let _guard = self.inner.auth_lock.lock().await;
        if self.has_token() {
            return Ok(());
        }
        self.login_locked().await
    }

    /// Discard the current token and authenticate again.
    pub async fn relogin(&self) -> Result<(), Error> {
        self.set_state(SessionState::TokenExpired);
        let _guard = self.inner.auth_lock.lock().await;
        self.login_locked().await
    }

    /// Exchange the current token for a fresh one.
    pub async fn refresh(&self) -> Result<(), Error> {
        let _guard = self.inner.auth_lock.lock().await;
        let Some(token) = self.inner.token.load_full() else {
            return self.login_locked().await;
        };

        let url = self.url(REFRESH_PATH)?;
        debug!("GET {}", url);
        let resp = self
            .inner
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.set_state(SessionState::TokenExpired);
            return Err(Error::SessionExpired);
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                method: Method::GET.to_string(),
                path: REFRESH_PATH.into(),
            });
        }

        let text = resp.text().await.map_err(Error::Transport)?;
        let token = extract_token(&text).ok_or_else(|| Error::Authentication {
            message: "no token in refresh response".into(),
        })?;
        self.inner.token.store(Some(Arc::new(token)));
        debug!("device token refreshed");
        Ok(())
    }

    /// Refresh only when no device call is outstanding.
    ///
    /// Returns `Ok(false)` when the refresh was skipped.
    pub async fn refresh_if_idle(&self) -> Result<bool, Error> {
        if self.in_flight() > 0 {
            debug!(in_flight = self.in_flight(), "skipping token refresh, calls outstanding");
            return Ok(false);
        }
        self.refresh().await.map(|()| true)
    }

    /// End the session. Failures are logged; the token is dropped either way.
    pub async fn logout(&self) {
        let _guard = self.inner.auth_lock.lock().await;
        if let Some(token) = self.inner.token.swap(None) {
            match self.url(LOGOUT_PATH) {
                Ok(url) => {
                    debug!("GET {}", url);
                    if let Err(e) = self
                        .inner
                        .http
                        .get(url)
                        .bearer_auth(token.expose_secret())
                        .send()
                        .await
                    {
                        warn!(error = %e, "logout failed (non-fatal)");
                    }
                }
                Err(e) => warn!(error = %e, "logout failed (non-fatal)"),
            }
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Read the firmware version and reject appliances too old for token auth.
    pub async fn check_version(&self) -> Result<String, Error> {
        let url = self.url(VERSION_PATH)?;
        debug!("GET {}", url);
        let resp = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(Error::Transport)?;
        let text = resp.text().await.map_err(Error::Transport)?;
        let body: Value = serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.clone(),
        })?;

        let version = body
            .pointer("/payload/version")
            .and_then(Value::as_str)
            .map(|v| v.replace('-', "."))
            .ok_or_else(|| Error::Envelope {
                message: "version payload missing".into(),
            })?;

        let major = version
            .split('.')
            .next()
            .and_then(|m| m.parse::<u32>().ok())
            .unwrap_or(0);
        if major < MIN_MAJOR_VERSION {
            return Err(Error::UnsupportedOperation(
                "firmware older than 5.0 does not support token authentication",
            ));
        }
        info!(%version, "device firmware version");
        Ok(version)
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Send one request and fold every outcome into a [`DeviceResponse`].
    ///
    /// Transport failures do not propagate as errors; they come back as an
    /// unreachable response for the classifier to interpret.
    pub async fn send(&self, method: Method, path_and_query: &str, body: Option<&Value>) -> DeviceResponse {
        let _in_flight = InFlight::enter(&self.inner.in_flight);

        let url = match self.url(path_and_query) {
            Ok(u) => u,
            Err(e) => return DeviceResponse::unreachable(method, path_and_query.into(), e.to_string()),
        };
        debug!("{} {}", method, url);

        let mut req = self.inner.http.request(method.clone(), url);
        if let Some(token) = self.inner.token.load_full() {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, %method, path = path_and_query, "device call failed");
                return DeviceResponse::unreachable(method, path_and_query.into(), e.to_string());
            }
        };
        let status = resp.status().as_u16();
        match resp.text().await {
            Ok(text) => DeviceResponse::from_parts(method, path_and_query.into(), status, text),
            Err(e) => DeviceResponse::unreachable(method, path_and_query.into(), e.to_string()),
        }
    }

    // ── Background refresh ───────────────────────────────────────

    /// Spawn the periodic token refresh loop.
    ///
    /// A failed refresh raises the "needs refresh" flag for the supervising
    /// sweep instead of interrupting calls in progress.
    pub fn spawn_refresh(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let connector = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = connector.refresh_if_idle().await {
                            warn!(error = %e, "token refresh failed, flagging session");
                            connector.inner.needs_refresh.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
        })
    }
}

fn parse_login(status: reqwest::StatusCode, text: &str) -> Result<SecretString, Error> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('0') {
        return Err(Error::Authentication {
            message: "bad username or password".into(),
        });
    }
    if trimmed.starts_with('2') || trimmed.contains(LOCKOUT_MARKER) {
        return Err(Error::AccountLocked {
            message: "too many bad login attempts or maximum logins reached".into(),
        });
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "login rejected (HTTP 401)".into(),
        });
    }
    if !status.is_success() {
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            method: Method::POST.to_string(),
            path: LOGIN_PATH.into(),
        });
    }
    extract_token(text).ok_or_else(|| Error::Authentication {
        message: "no token in login response".into(),
    })
}

fn extract_token(text: &str) -> Option<SecretString> {
    let body: Value = serde_json::from_str(text).ok()?;
    let token = body.get("token")?.as_str()?;
    (!token.is_empty()).then(|| SecretString::from(token.to_owned()))
}
