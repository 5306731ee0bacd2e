//! Authorization module - request authorization engine
//!
//! This module decides, for every protected request, whether the caller may
//! invoke the route:
//! - Route permission registry (path template + method -> requirements)
//! - Permission cache with local-session and Redis backends
//! - Permission authority client (remote source of truth)
//! - Authorization middleware tying the above together
//! - Slug gate for slug-tagged operations

mod authority;
mod cache;
mod evaluator;
mod extract;
mod identity;
mod middleware;
mod registry;
mod slug;

pub use authority::{
    AuthorityError, AuthorityResponse, AuthoritySettings, HttpAuthority, Origin, PermissionAuthority,
    PermissionQuery,
};
pub use cache::{CacheError, CacheStrategy, CachedPermissions, PermissionCache, RedisCache, SessionCache};
pub use evaluator::{evaluate, Decision};
pub use extract::CurrentUser;
pub use identity::{display_name, resolve_identity, Identity, IdentitySources, PermissionSet};
pub use middleware::{
    authorize, Authorizer, AuthorizerSettings, AUTHORIZATION_FAILED, AUTHORIZATION_MISSING, CREATED_BY_FIELD,
    PERMISSION_DENIED, TOKEN_NOT_FOUND,
};
pub use registry::{PathPattern, RequiredPermissions, RouteRegistry, RouteRule};
pub use slug::{SlugDecision, SlugGate, SlugRejection, SLUG_DENIED_MESSAGE};

/// Well-known permission codes
pub mod permissions {
    // Enquiry
    pub const ENQUIRY_CREATE: &str = "enquiry:create";
    pub const ENQUIRY_READ: &str = "enquiry:read";
    pub const ENQUIRY_CANCEL: &str = "enquiry:cancel";
    pub const ENQUIRY_ADMIN: &str = "enquiry:admin";

    // Admission
    pub const ADMISSION_CREATE: &str = "admission:create";
    pub const ADMISSION_APPROVE: &str = "admission:approve";
}

/// Well-known slugs
pub mod slugs {
    pub const ADMISSION_APPROVE: &str = "enquiry-approve";
}
