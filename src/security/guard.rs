//! Route and action guards.
//!
//! A [`RouteGuard`] names one requirement. Checks are evaluated against a
//! profile snapshot; the `protect_*`/`require_*` helpers also emit the
//! denial notice and the navigation signal.

use tracing::debug;

use super::identity::UserProfile;
use super::notify::{AUTH_ROUTE, HOME_ROUTE, Notice, Notifier};
use super::permissions::{Role, can_access_resource, has_permission, has_role};

const DEFAULT_DENIED_MESSAGE: &str = "You do not have permission to access this page";

/// Requirement for entering a route.
///
/// Precedence: `permission`, then `resource` + `action`, then `role`.
/// A guard with none of them admits any active profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteGuard {
    pub permission: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub role: Option<Role>,
    pub redirect_to: Option<String>,
    pub message: Option<String>,
}

impl RouteGuard {
    pub fn permission(id: impl Into<String>) -> Self {
        Self {
            permission: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn resource(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    pub fn redirect_to(mut self, route: impl Into<String>) -> Self {
        self.redirect_to = Some(route.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub fn check_route_access(profile: &UserProfile, guard: &RouteGuard) -> bool {
    let snapshot = &profile.permissions;
    if !snapshot.is_active {
        return false;
    }

    if let Some(permission) = &guard.permission {
        return has_permission(snapshot, permission);
    }

    if let (Some(resource), Some(action)) = (&guard.resource, &guard.action) {
        return can_access_resource(snapshot, resource, action);
    }

    if let Some(role) = guard.role {
        return has_role(snapshot, role);
    }

    true
}

/// Returns whether access was granted. On denial notifies and redirects.
pub fn protect_route(profile: &UserProfile, guard: &RouteGuard, notifier: &dyn Notifier) -> bool {
    if check_route_access(profile, guard) {
        return true;
    }
    debug!("Route guard denied {}", profile.subject_id());
    let message = guard.message.as_deref().unwrap_or(DEFAULT_DENIED_MESSAGE);
    notifier.notify(Notice::error("Access Denied", message));
    notifier.navigate(guard.redirect_to.as_deref().unwrap_or(HOME_ROUTE));
    false
}

pub fn require_auth(profile: &UserProfile, notifier: &dyn Notifier) -> bool {
    if profile.is_authenticated() {
        return true;
    }
    notifier.notify(Notice::error(
        "Authentication Required",
        "Please sign in to access this page",
    ));
    notifier.navigate(AUTH_ROUTE);
    false
}

pub fn require_role(profile: &UserProfile, role: Role, notifier: &dyn Notifier) -> bool {
    if has_role(&profile.permissions, role) {
        return true;
    }
    notifier.notify(Notice::error(
        "Access Denied",
        format!("This page requires {} role", role),
    ));
    notifier.navigate(HOME_ROUTE);
    false
}

pub fn require_permission(profile: &UserProfile, permission_id: &str, notifier: &dyn Notifier) -> bool {
    if has_permission(&profile.permissions, permission_id) {
        return true;
    }
    notifier.notify(Notice::error(
        "Access Denied",
        "You do not have the required permission",
    ));
    notifier.navigate(HOME_ROUTE);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::notify::MockNotifier;

    fn denied_to(route: &'static str, title: &'static str) -> MockNotifier {
        let mut n = MockNotifier::new();
        n.expect_notify()
            .withf(move |notice| notice.title == title)
            .times(1)
            .return_const(());
        n.expect_navigate()
            .withf(move |r| r == route)
            .times(1)
            .return_const(());
        n
    }

    fn silent() -> MockNotifier {
        let mut n = MockNotifier::new();
        n.expect_notify().times(0);
        n.expect_navigate().times(0);
        n
    }

    #[test]
    fn empty_guard_admits_active_profiles() {
        let p = UserProfile::signed_in("alice", Role::User);
        assert!(check_route_access(&p, &RouteGuard::default()));
    }

    #[test]
    fn inactive_profile_is_always_denied() {
        let mut p = UserProfile::signed_in("alice", Role::Admin);
        p.permissions.is_active = false;
        assert!(!check_route_access(&p, &RouteGuard::default()));
        assert!(!check_route_access(&p, &RouteGuard::role(Role::Admin)));
    }

    #[test]
    fn permission_takes_precedence_over_role() {
        let p = UserProfile::signed_in("alice", Role::Reseller);
        let guard = RouteGuard {
            permission: Some("sales:view".into()),
            role: Some(Role::Admin),
            ..RouteGuard::default()
        };
        assert!(check_route_access(&p, &guard));
    }

    #[test]
    fn resource_action_pairs() {
        let p = UserProfile::signed_in("alice", Role::Developer);
        assert!(check_route_access(&p, &RouteGuard::resource("cheat", "create")));
        assert!(!check_route_access(&p, &RouteGuard::resource("system", "admin")));

        // An action without a resource is not a requirement
        let half = RouteGuard {
            action: Some("admin".into()),
            ..RouteGuard::default()
        };
        assert!(check_route_access(&p, &half));
    }

    #[test]
    fn role_requires_exact_match() {
        let admin = UserProfile::signed_in("root", Role::Admin);
        assert!(!check_route_access(&admin, &RouteGuard::role(Role::Developer)));
        assert!(check_route_access(&admin, &RouteGuard::role(Role::Admin)));
    }

    #[test]
    fn protect_route_redirects_with_custom_message() {
        let mut n = MockNotifier::new();
        n.expect_notify()
            .withf(|notice| notice.title == "Access Denied" && notice.message == "Admins only")
            .times(1)
            .return_const(());
        n.expect_navigate()
            .withf(|r| r == "/dashboard")
            .times(1)
            .return_const(());

        let p = UserProfile::signed_in("alice", Role::User);
        let guard = RouteGuard::permission("system:admin")
            .redirect_to("/dashboard")
            .with_message("Admins only");
        assert!(!protect_route(&p, &guard, &n));
    }

    #[test]
    fn protect_route_defaults_to_home() {
        let n = denied_to(HOME_ROUTE, "Access Denied");
        let p = UserProfile::signed_in("alice", Role::User);
        assert!(!protect_route(&p, &RouteGuard::permission("user:manage"), &n));
    }

    #[test]
    fn require_auth_sends_anonymous_to_sign_in() {
        let n = denied_to(AUTH_ROUTE, "Authentication Required");
        assert!(!require_auth(&UserProfile::anonymous(), &n));
        assert!(require_auth(&UserProfile::signed_in("a", Role::User), &silent()));
    }

    #[test]
    fn require_role_and_permission() {
        let p = UserProfile::signed_in("alice", Role::Reseller);
        assert!(require_role(&p, Role::Reseller, &silent()));
        assert!(!require_role(&p, Role::Admin, &denied_to(HOME_ROUTE, "Access Denied")));
        assert!(require_permission(&p, "license:manage", &silent()));
        assert!(!require_permission(
            &p,
            "role:manage",
            &denied_to(HOME_ROUTE, "Access Denied")
        ));
    }
}
