pub mod admission;
pub mod enquiry;
pub mod health;

use crate::authz::RouteRegistry;

/// Every feature's rules, concatenated in priority order.
pub fn registry() -> RouteRegistry {
    RouteRegistry::from_features(&[health::route_rules, enquiry::route_rules, admission::route_rules])
}
