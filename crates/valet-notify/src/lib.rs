//! Outbound user notifications via the messaging gateway.
//!
//! Every send is filtered through the user's preferences (enabled flag,
//! category opt-in, quiet hours) and a per-user sliding-window rate limit
//! before anything leaves the process.

mod notifier;
mod window;

pub use notifier::{NotifyError, Notifier, SendOutcome};
pub use window::is_quiet_hours;
