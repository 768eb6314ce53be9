use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::authz::aci::{parse_aci_list, Expr};
use crate::authz::errors::AuthzError;
use crate::authz::evaluator::{build_evaluator, AccessEvaluator, EvaluatorRegistry};
use crate::authz::loader;
use crate::authz::types::*;
use crate::authz::AclSnapshot;
use crate::store::ConfigStore;

/// Owns the live ACL state and the configuration store behind it.
///
/// Readers clone the current snapshot and evaluate without holding a lock.
/// Writers serialize on the store mutex, stage their changes in the store,
/// commit, and only then publish a rebuilt snapshot.
#[derive(Debug)]
pub struct AuthorizationManager {
    snapshot: RwLock<Arc<AclSnapshot>>,
    writer: Mutex<ConfigStore>,
    sync_commits: bool,
}

impl AuthorizationManager {
    pub fn new(store: ConfigStore, snapshot: AclSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(store),
            sync_commits: true,
        }
    }

    /// Builds the live state from the committed contents of `store`.
    pub fn open(store: ConfigStore) -> Result<Self, AuthzError> {
        let snapshot = loader::load_snapshot(&store)?;
        Ok(Self::new(store, snapshot))
    }

    /// Whether commits ask the backend to fsync.
    pub fn with_sync_commits(mut self, sync: bool) -> Self {
        self.sync_commits = sync;
        self
    }

    pub fn snapshot(&self) -> Arc<AclSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ---------- Decisions ----------

    pub fn authorize(&self, principal: &Principal, resource: &str, right: &str) -> Decision {
        let snapshot = self.snapshot();
        let decision = decide(&snapshot, principal, resource, right);
        match decision {
            Decision::Indeterminate(reason) => tracing::debug!(
                principal = %principal.id,
                resource,
                right,
                ?reason,
                "Authorization indeterminate, denying"
            ),
            _ => tracing::debug!(
                principal = %principal.id,
                resource,
                right,
                decision = decision.label(),
                "Authorization decided"
            ),
        }
        decision
    }

    pub fn is_allowed(&self, principal: &Principal, resource: &str, right: &str) -> bool {
        self.authorize(principal, resource, right).is_allowed()
    }

    // ---------- Lookups ----------

    pub fn get_acl(&self, name: &str) -> Option<Arc<AclResource>> {
        self.snapshot().resources.get(name).cloned()
    }

    pub fn get_evaluator(&self, evaluator_type: &str) -> Result<EvaluatorOperators, AuthzError> {
        let snapshot = self.snapshot();
        let evaluator = snapshot
            .evaluators
            .get(evaluator_type)
            .ok_or_else(|| AuthzError::EvaluatorNotFound(evaluator_type.to_string()))?;
        Ok(EvaluatorOperators {
            evaluator_type: evaluator_type.to_string(),
            operators: evaluator.supported_operators().symbols(),
        })
    }

    pub fn list_resources(&self) -> Vec<ResourceSummary> {
        self.snapshot()
            .resources
            .values()
            .map(|res| ResourceSummary {
                name: res.name().to_string(),
                description: res.description().map(str::to_string),
            })
            .collect()
    }

    pub fn list_evaluators(&self) -> Vec<EvaluatorSummary> {
        self.snapshot()
            .evaluators
            .iter()
            .map(|(evaluator_type, ev)| EvaluatorSummary {
                evaluator_type: evaluator_type.to_string(),
                implementation: ev.implementation().to_string(),
            })
            .collect()
    }

    pub fn list_evaluator_operators(&self) -> Vec<EvaluatorOperators> {
        self.snapshot()
            .evaluators
            .iter()
            .map(|(evaluator_type, ev)| EvaluatorOperators {
                evaluator_type: evaluator_type.to_string(),
                operators: ev.supported_operators().symbols(),
            })
            .collect()
    }

    // ---------- Mutations ----------

    /// Replaces the rights, entries and description of `name`, creating the
    /// resource if needed. Nothing changes unless every ACI parses and the
    /// store commit succeeds.
    pub fn update_acls(
        &self,
        name: &str,
        rights: &str,
        aci_list: &str,
        description: Option<&str>,
    ) -> Result<Arc<AclResource>, AuthzError> {
        if name.trim().is_empty() {
            return Err(AuthzError::MissingField("resource id"));
        }
        let rights = Rights::parse_csv(rights)?;
        let entries = parse_aci_list(aci_list)?;
        let resource = Arc::new(AclResource::new(
            name,
            rights,
            entries,
            description.map(str::to_string),
        )?);

        self.mutate(|store, next| {
            loader::write_resource(store, &resource);
            next.resources
                .insert(resource.name().to_string(), resource.clone());
            Ok(())
        })?;

        tracing::info!(
            resource = name,
            entries = resource.entries().len(),
            "Updated ACL"
        );
        Ok(resource)
    }

    pub fn delete_acl(&self, name: &str) -> Result<(), AuthzError> {
        self.mutate(|store, next| {
            if next.resources.shift_remove(name).is_none() {
                return Err(AuthzError::ResourceNotFound(name.to_string()));
            }
            loader::remove_resource(store, name);
            Ok(())
        })?;
        tracing::info!(resource = name, "Deleted ACL");
        Ok(())
    }

    /// Inserts or replaces the evaluator registered under `evaluator_type`.
    pub fn register_evaluator(
        &self,
        evaluator_type: &str,
        evaluator: Arc<dyn AccessEvaluator>,
    ) -> Result<(), AuthzError> {
        if evaluator_type.trim().is_empty() {
            return Err(AuthzError::MissingField("evaluator type"));
        }
        let implementation = evaluator.implementation().to_string();
        self.mutate(|store, next| {
            loader::write_evaluator(store, evaluator_type, &implementation);
            next.evaluators.register(evaluator_type, evaluator);
            Ok(())
        })?;
        tracing::info!(evaluator_type, %implementation, "Registered evaluator");
        Ok(())
    }

    /// Registers a built-in implementation by id.
    pub fn add_evaluator(&self, evaluator_type: &str, implementation: &str) -> Result<(), AuthzError> {
        if implementation.trim().is_empty() {
            return Err(AuthzError::MissingField("implementation"));
        }
        let evaluator = build_evaluator(implementation.trim())?;
        self.register_evaluator(evaluator_type, evaluator)
    }

    /// Removes `evaluator_type`. Entries that reference it stay in place and
    /// stop matching. Returns whether anything was removed.
    pub fn unregister_evaluator(&self, evaluator_type: &str) -> Result<bool, AuthzError> {
        if self.snapshot().evaluators.get(evaluator_type).is_none() {
            return Ok(false);
        }
        let removed = self.mutate(|store, next| {
            let removed = next.evaluators.unregister(evaluator_type).is_some();
            if removed {
                loader::remove_evaluator(store, evaluator_type);
            }
            Ok(removed)
        })?;
        if removed {
            tracing::info!(evaluator_type, "Unregistered evaluator");
        }
        Ok(removed)
    }

    /// Runs `f` against the store and a copy of the current snapshot while
    /// holding the writer lock. The copy is published only after `f`
    /// succeeds and the store commits; otherwise pending store edits are
    /// rolled back.
    fn mutate<T, F>(&self, f: F) -> Result<T, AuthzError>
    where
        F: FnOnce(&mut ConfigStore, &mut AclSnapshot) -> Result<T, AuthzError>,
    {
        let mut store = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        // a writer that panicked may have left staged edits behind
        if store.has_pending_changes() {
            store.rollback();
        }

        let mut next = AclSnapshot::clone(&self.snapshot());
        let value = match f(&mut *store, &mut next) {
            Ok(value) => value,
            Err(e) => {
                store.rollback();
                return Err(e);
            }
        };

        if let Err(e) = store.commit(self.sync_commits) {
            store.rollback();
            tracing::error!(error = %e, "Failed to commit ACL configuration, rolled back");
            return Err(e.into());
        }

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(value)
    }
}

// ---------- Evaluation ----------

pub(crate) fn decide(
    snapshot: &AclSnapshot,
    principal: &Principal,
    resource: &str,
    right: &str,
) -> Decision {
    let Some(acl) = snapshot.resources.get(resource) else {
        return Decision::Indeterminate(IndeterminateReason::UnknownResource);
    };
    if !acl.rights().contains(right) {
        return Decision::Indeterminate(IndeterminateReason::UndeclaredRight);
    }
    acl.entries()
        .iter()
        .filter(|entry| entry.applies_to(right))
        .find(|entry| entry_matches(&snapshot.evaluators, entry, principal))
        .map(|entry| Decision::from(entry.permission))
        .unwrap_or(Decision::Indeterminate(IndeterminateReason::NoMatchingEntry))
}

/// An entry that cannot be fully resolved or evaluated never matches,
/// whatever its boolean structure.
fn entry_matches(registry: &EvaluatorRegistry, entry: &AclEntry, principal: &Principal) -> bool {
    let unresolved = entry
        .expression
        .comparisons()
        .into_iter()
        .find(|(attribute, operator)| registry.resolve(attribute, *operator).is_none());
    if let Some((attribute, operator)) = unresolved {
        tracing::debug!(
            attribute,
            %operator,
            aci = %entry,
            "Skipping ACI with unresolvable comparison"
        );
        return false;
    }
    match eval_expr(registry, &entry.expression, principal) {
        Some(matched) => matched,
        None => {
            tracing::debug!(aci = %entry, "Skipping ACI that cannot be evaluated for this request");
            false
        }
    }
}

/// `None` from any comparison makes the whole expression `None`, so `!`
/// never turns an undecidable comparison into a match.
fn eval_expr(registry: &EvaluatorRegistry, expr: &Expr, principal: &Principal) -> Option<bool> {
    match expr {
        Expr::Compare {
            attribute,
            operator,
            literal,
        } => registry
            .resolve(attribute, *operator)?
            .evaluate(principal, *operator, literal),
        Expr::And(lhs, rhs) => {
            let lhs = eval_expr(registry, lhs, principal)?;
            let rhs = eval_expr(registry, rhs, principal)?;
            Some(lhs && rhs)
        }
        Expr::Or(lhs, rhs) => {
            let lhs = eval_expr(registry, lhs, principal)?;
            let rhs = eval_expr(registry, rhs, principal)?;
            Some(lhs || rhs)
        }
        Expr::Not(inner) => eval_expr(registry, inner, principal).map(|v| !v),
    }
}
