pub mod aci;
pub mod errors;
pub mod evaluator;
pub mod loader;
pub mod manager;
pub mod policy;
pub mod service;
pub mod types;
pub mod web;

use std::sync::Arc;

use evaluator::EvaluatorRegistry;
use indexmap::IndexMap;
use types::AclResource;

pub use errors::AuthzError;
pub use manager::AuthorizationManager;
pub use service::AclAdminService;
pub use types::{Decision, Principal};

/// Resource that guards administration of ACLs and evaluators.
pub const ACL_CONFIG_RESOURCE: &str = "certServer.acl.configuration";

/// Complete authorization state at one point in time.
///
/// The manager never edits a published snapshot; every mutation builds a new
/// one and swaps it in, so readers always see one consistent version.
#[derive(Debug, Clone, Default)]
pub struct AclSnapshot {
    /// resource name -> ACL, in creation order
    pub resources: IndexMap<String, Arc<AclResource>>,
    /// evaluator type -> evaluator
    pub evaluators: EvaluatorRegistry,
}

impl AclSnapshot {
    /// Decision for `right` on `resource` against this version only.
    pub fn decide(&self, principal: &Principal, resource: &str, right: &str) -> Decision {
        manager::decide(self, principal, resource, right)
    }
}
