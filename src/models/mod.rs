pub mod admission;
pub mod enquiry;

use crate::authz::Identity;

/// Rebuilds an actor stamp from its three nullable columns.
pub(crate) fn actor_from_columns(
    user_id: Option<String>,
    user_name: Option<String>,
    email: Option<String>,
) -> Option<Identity> {
    if user_id.is_none() && user_name.is_none() && email.is_none() {
        return None;
    }
    Some(Identity {
        user_id,
        user_name,
        email,
    })
}
