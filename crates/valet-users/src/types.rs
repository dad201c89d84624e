use serde::{Deserialize, Serialize};
use valet_core::types::{NotificationPrefs, Permission, Soul, UserRole};

/// Full user record as stored in the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    pub permissions: Vec<Permission>,
    pub soul: Soul,
    pub phone: Option<String>,
    pub notification_prefs: NotificationPrefs,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl User {
    /// True when the user has a non-empty phone configured for outbound
    /// notifications.
    pub fn has_phone(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.is_empty())
    }
}
