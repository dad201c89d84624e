//! Deduplicated alert state and multi-channel notification dispatch.
//!
//! Each alert condition is identified by an opaque `alert_key`. Triggering
//! the same key repeatedly while it is active never produces a second
//! notification; resolving and re-firing does.

pub mod dispatch;
pub mod error;
pub mod state;
pub mod types;

pub use dispatch::{AlertChannel, AlertDispatcher};
pub use error::{AlertError, Result};
pub use state::AlertStore;
pub use types::{Alert, Severity, TriggerOutcome};
