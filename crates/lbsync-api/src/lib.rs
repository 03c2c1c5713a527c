// lbsync-api: Async Rust client for the FortiADC REST API

pub mod client;
pub mod endpoints;
pub mod error;
pub mod resource;
pub mod response;
pub mod session;
pub mod transport;

pub use client::AdcClient;
pub use endpoints::VsStats;
pub use error::Error;
pub use resource::{Action, Fields, ResourceKind, ResourcePath};
pub use response::{DeviceResponse, Outcome};
pub use session::{Connector, Credentials, SessionState};
pub use transport::{TlsMode, TransportConfig};
