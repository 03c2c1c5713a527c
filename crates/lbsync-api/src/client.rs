// Resource adapter HTTP client
//
// Generic idempotent CRUD over the appliance REST surface. Endpoint modules
// (system, network, slb) are implemented as inherent methods in separate
// files; this module owns request dispatch, tolerated-code handling, the
// single re-login retry and the GET-then-merge update protocol.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Error;
use crate::resource::{Action, Fields, ResourcePath, field_str};
use crate::response::{Outcome, classify};
use crate::session::Connector;

/// Resource adapter bound to one appliance session.
#[derive(Clone)]
pub struct AdcClient {
    connector: Connector,
}

impl AdcClient {
    pub fn new(connector: Connector) -> Self {
        Self { connector }
    }

    /// The underlying session (for login, refresh and supervision).
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Send one request and classify it against the kind's tolerated codes.
    ///
    /// An authentication-failure classification triggers exactly one
    /// re-login and resend before the error surfaces.
    async fn call(
        &self,
        action: Action,
        path: &ResourcePath,
        body: Option<&Value>,
    ) -> Result<Outcome, Error> {
        self.call_tolerating(action, path, body, path.kind().tolerated(action))
            .await
    }

    async fn call_tolerating(
        &self,
        action: Action,
        path: &ResourcePath,
        body: Option<&Value>,
        tolerated: &[i64],
    ) -> Result<Outcome, Error> {
        self.connector.ensure_session().await?;

        let target = path.to_string();
        let resp = self.connector.send(action.method(), &target, body).await;

        match classify(&resp, tolerated) {
            Err(e) if e.is_auth_expired() => {
                warn!(error = %e, resource = %path.kind(), "session rejected, re-authenticating");
                self.connector.relogin().await?;
                let resp = self.connector.send(action.method(), &target, body).await;
                classify(&resp, tolerated)
            }
            other => other,
        }
    }

    // ── CRUD ─────────────────────────────────────────────────────────

    /// Create an object. Static defaults for the kind fill attributes the
    /// caller did not set.
    pub async fn create(&self, path: &ResourcePath, fields: Fields) -> Result<Outcome, Error> {
        let mut body = path.kind().create_defaults();
        body.extend(fields);
        let outcome = self.call(Action::Create, path, Some(&Value::Object(body))).await?;
        if let Outcome::Tolerated(code) = outcome {
            debug!(resource = %path.kind(), code, "create already converged");
        }
        Ok(outcome)
    }

    /// Fetch the current object and merge `fields` over it.
    ///
    /// Fails closed: if the current object cannot be read, nothing is written.
    pub async fn update(&self, path: &ResourcePath, fields: Fields) -> Result<Outcome, Error> {
        let Some(current) = self.get_one(path).await? else {
            return Err(Error::NotFound {
                resource: path.kind().to_string(),
                key: path.mkey_value().unwrap_or_default().to_owned(),
            });
        };
        self.put_merged(path, current, fields).await
    }

    /// Merge `fields` over an already-read `current` object and PUT it.
    pub async fn put_merged(
        &self,
        path: &ResourcePath,
        mut current: Fields,
        fields: Fields,
    ) -> Result<Outcome, Error> {
        current.extend(fields);
        self.call(Action::Update, path, Some(&Value::Object(current)))
            .await
    }

    /// Delete an object. "Already absent" is tolerated.
    pub async fn delete(&self, path: &ResourcePath) -> Result<Outcome, Error> {
        let outcome = self.call(Action::Delete, path, None).await?;
        if let Outcome::Tolerated(code) = outcome {
            debug!(resource = %path.kind(), code, "object already absent");
        }
        Ok(outcome)
    }

    /// Read one object by its `mkey`. Returns `None` when it does not exist.
    ///
    /// Kinds without a by-id read fall back to a linear scan of the listing.
    pub async fn get_one(&self, path: &ResourcePath) -> Result<Option<Fields>, Error> {
        if !path.kind().supports_get_one() {
            let Some(key) = path.mkey_value() else {
                return Ok(None);
            };
            let all = self
                .get_all_tolerating(&path.without_mkey(), Action::GetOne)
                .await?;
            return Ok(find_field(all, "mkey", key));
        }

        match self.call(Action::GetOne, path, None).await? {
            Outcome::Tolerated(_) => Ok(None),
            Outcome::Applied(Value::Object(obj)) => Ok(Some(obj)),
            Outcome::Applied(Value::Array(items)) => Ok(items.into_iter().find_map(into_object)),
            Outcome::Applied(other) => Err(Error::Deserialization {
                message: format!("expected an object for {}", path.kind()),
                body: other.to_string(),
            }),
        }
    }

    /// List every object of a collection.
    pub async fn get_all(&self, path: &ResourcePath) -> Result<Vec<Fields>, Error> {
        let outcome = self.call(Action::GetAll, path, None).await?;
        listing(path, outcome)
    }

    /// List a collection on the way to deleting from it. A listing the
    /// device answers with a delete-tolerated code (the scope or collection
    /// is already gone) is empty.
    pub async fn get_all_for_delete(&self, path: &ResourcePath) -> Result<Vec<Fields>, Error> {
        self.get_all_tolerating(path, Action::Delete).await
    }

    /// Listing that accepts the codes `action` tolerates on this kind.
    async fn get_all_tolerating(&self, path: &ResourcePath, action: Action) -> Result<Vec<Fields>, Error> {
        let tolerated = path.kind().tolerated(action);
        let outcome = self
            .call_tolerating(Action::GetAll, path, None, tolerated)
            .await?;
        if let Outcome::Tolerated(code) = outcome {
            debug!(resource = %path.kind(), code, "listing already absent");
        }
        listing(path, outcome)
    }

    /// Scan a listing for the first object whose `field` equals `value`.
    pub async fn find_by(
        &self,
        path: &ResourcePath,
        field: &str,
        value: &str,
    ) -> Result<Option<Fields>, Error> {
        let all = self.get_all(path).await?;
        Ok(find_field(all, field, value))
    }

    /// [`find_by`](Self::find_by) over [`get_all_for_delete`](Self::get_all_for_delete).
    pub async fn find_by_for_delete(
        &self,
        path: &ResourcePath,
        field: &str,
        value: &str,
    ) -> Result<Option<Fields>, Error> {
        let all = self.get_all_for_delete(path).await?;
        Ok(find_field(all, field, value))
    }

    /// Structured existence check.
    pub async fn exists(&self, path: &ResourcePath) -> Result<bool, Error> {
        Ok(self.get_one(path).await?.is_some())
    }
}

fn listing(path: &ResourcePath, outcome: Outcome) -> Result<Vec<Fields>, Error> {
    match outcome {
        Outcome::Tolerated(_) => Ok(Vec::new()),
        Outcome::Applied(Value::Array(items)) => Ok(items.into_iter().filter_map(into_object).collect()),
        Outcome::Applied(Value::Object(obj)) => Ok(vec![obj]),
        Outcome::Applied(other) => Err(Error::Deserialization {
            message: format!("expected a listing for {}", path.kind()),
            body: other.to_string(),
        }),
    }
}

fn find_field(all: Vec<Fields>, field: &str, value: &str) -> Option<Fields> {
    all.into_iter()
        .find(|obj| field_str(obj, field).as_deref() == Some(value))
}

fn into_object(v: Value) -> Option<Fields> {
    match v {
        Value::Object(m) => Some(m),
        _ => None,
    }
}
