use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use utoipa::ToSchema;

/// The resolved caller for one request. Serialized as the `created_by` stamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Permission codes granted to one identity for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(HashSet<String>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    /// True when at least one of `required` is granted.
    pub fn intersects<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().any(|p| self.0.contains(p.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Where identity material may come from, in precedence order.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentitySources<'a> {
    /// `user` object from the authority response.
    pub user: Option<&'a Value>,
    /// `userInfo` object from the authority response.
    pub user_info: Option<&'a Value>,
    /// Identity fields carried by the request body itself.
    pub request: Option<&'a Value>,
    /// Email extracted from the request before it was stripped.
    pub email: Option<&'a str>,
}

pub fn resolve_identity(sources: IdentitySources<'_>) -> Identity {
    let ordered = [sources.user, sources.user_info, sources.request];

    let user_id = ordered
        .iter()
        .flatten()
        .find_map(|obj| string_field(obj, &["id", "_id", "user_id"]));

    let email = [sources.user, sources.user_info]
        .iter()
        .flatten()
        .find_map(|obj| string_field(obj, &["email"]))
        .or_else(|| sources.email.filter(|e| !e.trim().is_empty()).map(str::to_string));

    Identity {
        user_id,
        user_name: display_name(sources),
        email,
    }
}

/// Builds "First Last" from explicit name parts on `user`, then `userInfo`,
/// then by splitting a free-text `name`.
pub fn display_name(sources: IdentitySources<'_>) -> Option<String> {
    for obj in [sources.user, sources.user_info].into_iter().flatten() {
        let first = string_field(obj, &["first_name", "firstName"]);
        let last = string_field(obj, &["last_name", "lastName"]);
        if first.is_some() || last.is_some() {
            return join_name(first.as_deref(), last.as_deref());
        }
    }

    let free_text = [sources.user, sources.user_info, sources.request]
        .into_iter()
        .flatten()
        .find_map(|obj| string_field(obj, &["name"]))?;

    let tokens: Vec<&str> = free_text.split_whitespace().collect();
    match tokens.as_slice() {
        [] => None,
        [only] => join_name(Some(*only), None),
        [first, .., last] => join_name(Some(*first), Some(*last)),
    }
}

fn join_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// First non-empty value among `keys`; numeric ids are stringified.
fn string_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
