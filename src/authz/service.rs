//! Administrative operations, guarded by the ACL of the configuration
//! resource itself and recorded in the audit log.

use std::sync::Arc;

use crate::audit::{AuditLog, Outcome, EVENT_AUTHZ, EVENT_CONFIG_ACL};
use crate::authz::errors::AuthzError;
use crate::authz::manager::AuthorizationManager;
use crate::authz::types::*;
use crate::authz::ACL_CONFIG_RESOURCE;

const READ: &str = "read";
const MODIFY: &str = "modify";

#[derive(Debug, Clone)]
pub struct AclAdminService {
    manager: Arc<AuthorizationManager>,
    audit: AuditLog,
    admin_resource: String,
}

impl AclAdminService {
    pub fn new(manager: Arc<AuthorizationManager>, audit: AuditLog) -> Self {
        Self {
            manager,
            audit,
            admin_resource: ACL_CONFIG_RESOURCE.to_string(),
        }
    }

    /// Guard administration with a different resource.
    pub fn with_admin_resource(mut self, resource: impl Into<String>) -> Self {
        self.admin_resource = resource.into();
        self
    }

    pub fn manager(&self) -> &Arc<AuthorizationManager> {
        &self.manager
    }

    fn require(&self, caller: &Principal, right: &str, op: &str) -> Result<(), AuthzError> {
        if self.manager.is_allowed(caller, &self.admin_resource, right) {
            return Ok(());
        }
        tracing::warn!(
            principal = %caller.id,
            resource = %self.admin_resource,
            right,
            op,
            "ACL administration denied"
        );
        self.audit.audit(
            EVENT_AUTHZ,
            &caller.id,
            Outcome::Failure,
            [
                ("op", op.to_string()),
                ("resource", self.admin_resource.clone()),
                ("right", right.to_string()),
            ],
        );
        Err(AuthzError::AccessDenied {
            principal: caller.id.clone(),
            resource: self.admin_resource.clone(),
            right: right.to_string(),
        })
    }

    fn record<T>(
        &self,
        caller: &Principal,
        op: &str,
        mut params: Vec<(&'static str, String)>,
        result: &Result<T, AuthzError>,
    ) {
        let outcome = match result {
            Ok(_) => Outcome::Success,
            Err(e) => {
                params.push(("error", e.to_string()));
                Outcome::Failure
            }
        };
        params.push(("op", op.to_string()));
        self.audit.audit(EVENT_CONFIG_ACL, &caller.id, outcome, params);
    }

    /// Evaluates the caller's own access. Needs no administrative right.
    pub fn authorize(&self, caller: &Principal, resource: &str, right: &str) -> Decision {
        self.manager.authorize(caller, resource, right)
    }

    pub fn list_acls(&self, caller: &Principal) -> Result<Vec<ResourceSummary>, AuthzError> {
        self.require(caller, READ, "list_acls")?;
        Ok(self.manager.list_resources())
    }

    pub fn get_acl(&self, caller: &Principal, name: &str) -> Result<AclView, AuthzError> {
        self.require(caller, READ, "get_acl")?;
        self.manager
            .get_acl(name)
            .map(|res| AclView::from(res.as_ref()))
            .ok_or_else(|| AuthzError::ResourceNotFound(name.to_string()))
    }

    pub fn update_acl(
        &self,
        caller: &Principal,
        name: &str,
        req: &UpdateAclRequest,
    ) -> Result<AclView, AuthzError> {
        self.require(caller, MODIFY, "update_acl")?;
        let result = self
            .manager
            .update_acls(name, &req.rights, &req.acis, req.description.as_deref())
            .map(|res| AclView::from(res.as_ref()));
        self.record(
            caller,
            "update_acl",
            vec![
                ("resource", name.to_string()),
                ("rights", req.rights.clone()),
                ("acis", req.acis.clone()),
            ],
            &result,
        );
        result
    }

    pub fn delete_acl(&self, caller: &Principal, name: &str) -> Result<(), AuthzError> {
        self.require(caller, MODIFY, "delete_acl")?;
        let result = self.manager.delete_acl(name);
        self.record(caller, "delete_acl", vec![("resource", name.to_string())], &result);
        result
    }

    pub fn list_evaluators(&self, caller: &Principal) -> Result<Vec<EvaluatorSummary>, AuthzError> {
        self.require(caller, READ, "list_evaluators")?;
        Ok(self.manager.list_evaluators())
    }

    pub fn list_evaluator_operators(
        &self,
        caller: &Principal,
    ) -> Result<Vec<EvaluatorOperators>, AuthzError> {
        self.require(caller, READ, "list_evaluator_operators")?;
        Ok(self.manager.list_evaluator_operators())
    }

    pub fn get_evaluator(
        &self,
        caller: &Principal,
        evaluator_type: &str,
    ) -> Result<EvaluatorOperators, AuthzError> {
        self.require(caller, READ, "get_evaluator")?;
        self.manager.get_evaluator(evaluator_type)
    }

    pub fn add_evaluator(
        &self,
        caller: &Principal,
        evaluator_type: &str,
        implementation: &str,
    ) -> Result<(), AuthzError> {
        self.require(caller, MODIFY, "add_evaluator")?;
        let result = self.manager.add_evaluator(evaluator_type, implementation);
        self.record(
            caller,
            "add_evaluator",
            vec![
                ("type", evaluator_type.to_string()),
                ("implementation", implementation.to_string()),
            ],
            &result,
        );
        result
    }

    /// Returns whether the type was registered.
    pub fn remove_evaluator(&self, caller: &Principal, evaluator_type: &str) -> Result<bool, AuthzError> {
        self.require(caller, MODIFY, "remove_evaluator")?;
        let result = self.manager.unregister_evaluator(evaluator_type);
        self.record(
            caller,
            "remove_evaluator",
            vec![("type", evaluator_type.to_string())],
            &result,
        );
        result
    }
}
