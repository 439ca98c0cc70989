//! Async Rust client for the CrowdSec Local API.
//!
//! The Local API (LAPI) is the REST surface a CrowdSec engine exposes to
//! its bouncers: active decisions, triggered alerts, bouncer registration,
//! and liveness. [`LapiClient`] wraps it with bouncer-key authentication
//! (`X-Api-Key`), JSON handling, and typed errors; `warden-core` drives it
//! for alert ingestion and fleet status reporting.
//!
//! ```no_run
//! # async fn demo() -> Result<(), warden_api::Error> {
//! use warden_api::{LapiClient, TransportConfig};
//!
//! let key: secrecy::SecretString = "bouncer-key".to_string().into();
//! let client = LapiClient::from_api_key("http://crowdsec:8080", &key, &TransportConfig::default())?;
//! client.heartbeat().await?;
//! for alert in client.list_alerts(100, 0).await? {
//!     println!("{:?} {:?}", alert.scenario, alert.source.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::LapiClient;
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
pub use types::{
    Alert, AlertEvent, AlertSource, Decision, DecisionFilter, MetaItem, NewDecision,
};
