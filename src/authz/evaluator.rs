use super::identity::{Identity, PermissionSet};
use super::registry::{RequiredPermissions, RouteRule};

/// Outcome of the main permission check for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Evaluation order:
/// 1. rule with `authorize = false` -> allow
/// 2. `*` -> allow
/// 3. any granted code in the required list -> allow
/// 4. deny
pub fn evaluate(rule: &RouteRule, identity: &Identity, granted: &PermissionSet) -> Decision {
    let user_id = identity.user_id.as_deref().unwrap_or("-");

    if !rule.authorize {
        tracing::debug!(user_id, route = %rule.pattern.as_str(), "authorization skipped for route");
        return Decision::Allow;
    }

    match &rule.permissions {
        RequiredPermissions::Any => {
            tracing::debug!(user_id, route = %rule.pattern.as_str(), "wildcard route");
            Decision::Allow
        }
        RequiredPermissions::AnyOf(required) if granted.intersects(required.as_slice()) => {
            tracing::debug!(
                user_id,
                route = %rule.pattern.as_str(),
                required = %rule.permissions,
                "permission match"
            );
            Decision::Allow
        }
        RequiredPermissions::AnyOf(_) => {
            tracing::debug!(
                user_id,
                route = %rule.pattern.as_str(),
                required = %rule.permissions,
                granted = granted.len(),
                "permission denied"
            );
            Decision::Deny
        }
    }
}
