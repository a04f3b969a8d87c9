//! Candidate selection
//!
//! Criteria narrow the catalog (or registry) down to routable candidates,
//! routing rules may pin them to a named subset, and the load balancer picks
//! one of them per policy. Both work over the
//! [`MeshMember`] trait so services and registered agents share the logic.

pub mod criteria;
pub mod load_balancer;
pub mod rules;

pub use criteria::{MeshMember, SelectionCriteria, CAPABILITIES_METADATA_KEY};
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy};
pub use rules::{matches_pattern, RoutingRule, RoutingTable, RuleCondition};
