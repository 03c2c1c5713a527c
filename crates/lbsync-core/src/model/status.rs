// ── Lifecycle status types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Provisioning state of a logical entity.
///
/// `PENDING_* -> ACTIVE | ERROR | DELETED`. ERROR requires an external re-drive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStatus {
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    Active,
    Deleted,
    Error,
}

impl ProvisioningStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Active | Self::Deleted | Self::Error)
    }

    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }
}

/// Observed operating state of a logical entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingStatus {
    Online,
    Offline,
    Degraded,
    Error,
    NoMonitor,
}

/// The five logical entity types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    LoadBalancer,
    Listener,
    Pool,
    Member,
    HealthMonitor,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn status_strings_match_upstream_spelling() {
        assert_eq!(ProvisioningStatus::PendingDelete.to_string(), "PENDING_DELETE");
        assert_eq!(
            ProvisioningStatus::from_str("PENDING_CREATE").ok(),
            Some(ProvisioningStatus::PendingCreate)
        );
        assert_eq!(OperatingStatus::NoMonitor.to_string(), "NO_MONITOR");
        assert!(ProvisioningStatus::Error.is_terminal());
    }
}
