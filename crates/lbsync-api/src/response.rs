// ── Response envelope classification ──
//
// Every device call yields one `DeviceResponse`, including calls that never
// reached the appliance. `classify` turns that value into either a success
// outcome or an `Error`, applying the per-operation tolerated code set.

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::error::Error;

/// Payload markers the appliance uses for a dead session.
const SESSION_TIMEOUT: &str = "Session Timeout";
const INVALID_LICENSE: &str = "Invalid VM License";
const TOKEN_EXPIRED: &str = "Token is expired";

/// Uniform result of one device round trip.
///
/// Connection-level failures are folded into this same shape
/// (`http_status == 0`, `failure` set) so call sites have one value to inspect.
#[derive(Debug, Clone)]
pub struct DeviceResponse {
    pub method: Method,
    pub path: String,
    pub http_status: u16,
    pub body: Option<Value>,
    pub text: String,
    pub failure: Option<String>,
}

impl DeviceResponse {
    /// A response that never reached the device.
    pub fn unreachable(method: Method, path: String, reason: impl Into<String>) -> Self {
        Self {
            method,
            path,
            http_status: 0,
            body: None,
            text: String::new(),
            failure: Some(reason.into()),
        }
    }

    /// Build from a status code and raw body text.
    pub fn from_parts(method: Method, path: String, http_status: u16, text: String) -> Self {
        let body = serde_json::from_str(&text).ok();
        Self {
            method,
            path,
            http_status,
            body,
            text,
            failure: None,
        }
    }

    fn message(&self) -> Option<&str> {
        self.body.as_ref()?.get("message")?.as_str()
    }

    fn payload_str(&self) -> Option<&str> {
        self.body.as_ref()?.get("payload")?.as_str()
    }
}

/// Successful classification of a device response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The operation was applied; carries the envelope payload.
    Applied(Value),
    /// The device reported a business code in the tolerated set.
    Tolerated(i64),
}

impl Outcome {
    pub fn is_tolerated(&self) -> bool {
        matches!(self, Self::Tolerated(_))
    }

    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Applied(v) => Some(v),
            Self::Tolerated(_) => None,
        }
    }
}

/// Classify a response against the tolerated business codes of its operation.
pub fn classify(resp: &DeviceResponse, tolerated: &[i64]) -> Result<Outcome, Error> {
    if let Some(reason) = &resp.failure {
        return Err(Error::Unreachable {
            message: reason.clone(),
        });
    }

    match resp.payload_str() {
        Some(SESSION_TIMEOUT) => return Err(Error::SessionExpired),
        Some(INVALID_LICENSE) => {
            return Err(Error::Authentication {
                message: INVALID_LICENSE.into(),
            });
        }
        _ => {}
    }

    match resp.http_status {
        200 => {}
        401 => return Err(Error::SessionExpired),
        424 => {
            return Err(Error::DependencyExists {
                message: resp
                    .message()
                    .map_or_else(|| format!("{} {}", resp.method, resp.path), str::to_owned),
            });
        }
        status => {
            if resp.message() == Some(TOKEN_EXPIRED) {
                return Err(Error::SessionExpired);
            }
            return Err(Error::HttpStatus {
                status,
                method: resp.method.to_string(),
                path: resp.path.clone(),
            });
        }
    }

    let Some(body) = resp.body.as_ref() else {
        return Err(envelope_err("response body is not JSON"));
    };
    if is_empty(body) {
        return Err(envelope_err("response body is empty"));
    }

    if let Some(status) = body.get("status").and_then(Value::as_str) {
        if status != "success" {
            return Err(envelope_err(format!("status {status}")));
        }
    }
    if let Some(code) = body.get("http_status").and_then(Value::as_u64) {
        if code != 200 {
            return Err(envelope_err(format!("embedded http_status {code}")));
        }
    }
    if let Some(method) = body.get("http_method").and_then(Value::as_str) {
        if !method.eq_ignore_ascii_case(resp.method.as_str()) {
            return Err(envelope_err(format!(
                "method mismatch: sent {}, device answered {method}",
                resp.method
            )));
        }
    }
    if body.get("results").is_some_and(is_empty) {
        return Err(envelope_err("results are empty"));
    }

    let payload = match body.get("payload") {
        None | Some(Value::Null) => return Err(envelope_err("missing payload")),
        Some(p) => p,
    };

    match payload {
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Outcome::Applied(payload.clone())),
            Some(code) if tolerated.contains(&code) => {
                debug!(code, method = %resp.method, path = %resp.path, "tolerated device code");
                Ok(Outcome::Tolerated(code))
            }
            Some(code) => Err(Error::Device {
                code,
                method: resp.method.to_string(),
                path: resp.path.clone(),
            }),
            None => Ok(Outcome::Applied(payload.clone())),
        },
        _ => Ok(Outcome::Applied(payload.clone())),
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn envelope_err(message: impl Into<String>) -> Error {
    Error::Envelope {
        message: message.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ok(body: &Value) -> DeviceResponse {
        DeviceResponse::from_parts(Method::POST, "/api/vdom".into(), 200, body.to_string())
    }

    #[test]
    fn zero_payload_is_applied() {
        let out = classify(&ok(&json!({"payload": 0})), &[]).unwrap();
        assert_eq!(out, Outcome::Applied(json!(0)));
    }

    #[test]
    fn tolerated_code_becomes_success() {
        let out = classify(&ok(&json!({"payload": -15})), &[-15]).unwrap();
        assert!(out.is_tolerated());
    }

    #[test]
    fn untolerated_code_is_device_error() {
        let err = classify(&ok(&json!({"payload": -15})), &[-1]).unwrap_err();
        assert_eq!(err.device_code(), Some(-15));
    }

    #[test]
    fn session_timeout_marker_is_auth_failure_despite_200() {
        let err = classify(&ok(&json!({"payload": "Session Timeout"})), &[]).unwrap_err();
        assert!(err.is_auth_expired());
        let err = classify(&ok(&json!({"payload": "Invalid VM License"})), &[]).unwrap_err();
        assert!(err.is_auth_expired());
    }

    #[test]
    fn session_markers_win_over_error_status() {
        for status in [403, 500, 424] {
            let resp = DeviceResponse::from_parts(
                Method::PUT,
                "/api/load_balance_pool".into(),
                status,
                json!({"payload": "Session Timeout"}).to_string(),
            );
            assert!(classify(&resp, &[]).unwrap_err().is_auth_expired(), "status {status}");
        }
        let resp = DeviceResponse::from_parts(
            Method::GET,
            "/api/vdom".into(),
            403,
            json!({"payload": "Invalid VM License"}).to_string(),
        );
        assert!(matches!(
            classify(&resp, &[]),
            Err(Error::Authentication { .. })
        ));
    }

    #[test]
    fn expired_token_message_on_error_status() {
        let resp = DeviceResponse::from_parts(
            Method::GET,
            "/api/vdom".into(),
            500,
            json!({"message": "Token is expired"}).to_string(),
        );
        assert!(classify(&resp, &[]).unwrap_err().is_auth_expired());
    }

    #[test]
    fn envelope_checks_fail_independently() {
        assert!(classify(&ok(&json!({"status": "fail", "payload": 0})), &[]).is_err());
        assert!(classify(&ok(&json!({"http_status": 500, "payload": 0})), &[]).is_err());
        assert!(classify(&ok(&json!({"http_method": "GET", "payload": 0})), &[]).is_err());
        assert!(classify(&ok(&json!({"results": [], "payload": 0})), &[]).is_err());
        assert!(classify(&ok(&json!({})), &[]).is_err());
    }

    #[test]
    fn empty_listing_is_success() {
        let out = classify(&ok(&json!({"payload": []})), &[]).unwrap();
        assert_eq!(out.into_payload(), Some(json!([])));
    }

    #[test]
    fn failed_dependency_status() {
        let resp = DeviceResponse::from_parts(Method::DELETE, "/api/vdom".into(), 424, "{}".into());
        assert!(matches!(
            classify(&resp, &[]),
            Err(Error::DependencyExists { .. })
        ));
    }

    #[test]
    fn connection_failure_is_transient() {
        let resp = DeviceResponse::unreachable(Method::GET, "/api/vdom".into(), "refused");
        assert!(classify(&resp, &[]).unwrap_err().is_transient());
    }
}
