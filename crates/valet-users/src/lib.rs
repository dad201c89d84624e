//! User records, permissions, and per-user external credentials.

pub mod db;
pub mod error;
pub mod oauth;
pub mod permissions;
pub mod types;

pub use db::UserStore;
pub use error::{Result, UserError};
pub use oauth::OAuthTokenStore;
pub use types::User;
