use valet_core::types::{Permission, UserRole};

use crate::types::User;

/// Whether `user` may see a tool gated on `required`.
///
/// Admins bypass every check. Tools with no required permission are visible
/// to everyone; otherwise the permission must be in the user's set.
pub fn tool_visible(user: &User, required: Option<Permission>) -> bool {
    if user.role == UserRole::Admin {
        return true;
    }
    match required {
        None => true,
        Some(p) => user.permissions.contains(&p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valet_core::types::{NotificationPrefs, Soul};

    fn user(role: UserRole, permissions: Vec<Permission>) -> User {
        User {
            id: "u".into(),
            name: "u".into(),
            role,
            permissions,
            soul: Soul::default(),
            phone: None,
            notification_prefs: NotificationPrefs::default(),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn ungated_tools_visible_to_everyone() {
        let u = user(UserRole::User, vec![]);
        assert!(tool_visible(&u, None));
    }

    #[test]
    fn gated_tools_require_the_permission() {
        let u = user(UserRole::User, vec![Permission::Home]);
        assert!(tool_visible(&u, Some(Permission::Home)));
        assert!(!tool_visible(&u, Some(Permission::Media)));
    }

    #[test]
    fn admin_role_unlocks_everything() {
        let u = user(UserRole::Admin, vec![]);
        assert!(tool_visible(&u, Some(Permission::ClaudeCode)));
        assert!(tool_visible(&u, Some(Permission::Admin)));
    }
}
