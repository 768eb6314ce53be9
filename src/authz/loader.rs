use std::path::Path;
use std::sync::Arc;

use crate::authz::aci::{parse_aci, parse_aci_list};
use crate::authz::errors::AuthzError;
use crate::authz::evaluator::build_evaluator;
use crate::authz::policy::parse_kdl_document;
use crate::authz::types::*;
use crate::authz::AclSnapshot;
use crate::store::{ConfigStore, SubStore};

// Store layout:
//   authz.acls.<resource>.{rights, description, aci}
//   authz.evaluators.<type>.implementation
const AUTHZ: &str = "authz";
const ACLS: &str = "acls";
const EVALUATORS: &str = "evaluators";
const RIGHTS: &str = "rights";
const DESCRIPTION: &str = "description";
const ACI: &str = "aci";
const IMPLEMENTATION: &str = "implementation";

/// Build the authorization state from the committed store contents.
pub fn load_snapshot(store: &ConfigStore) -> Result<AclSnapshot, AuthzError> {
    let mut snapshot = AclSnapshot::default();

    if let Some(evaluators) = store.get_sub_store(&[AUTHZ, EVALUATORS]) {
        for (evaluator_type, node) in evaluators.sub_stores() {
            let implementation = node.get_string(IMPLEMENTATION).ok_or_else(|| {
                AuthzError::InvalidPolicy(format!(
                    "evaluator `{evaluator_type}` has no `{IMPLEMENTATION}`"
                ))
            })?;
            snapshot
                .evaluators
                .register(evaluator_type, build_evaluator(implementation)?);
        }
    }

    if let Some(acls) = store.get_sub_store(&[AUTHZ, ACLS]) {
        for (name, node) in acls.sub_stores() {
            let resource = resource_from_store(name, node)?;
            snapshot
                .resources
                .insert(name.to_string(), Arc::new(resource));
        }
    }

    tracing::info!(
        resources = snapshot.resources.len(),
        evaluators = snapshot.evaluators.len(),
        "Loaded ACL configuration"
    );

    Ok(snapshot)
}

fn resource_from_store(name: &str, node: &SubStore) -> Result<AclResource, AuthzError> {
    let rights = Rights::parse_csv(node.get_string(RIGHTS).unwrap_or_default())?;
    let entries = parse_aci_list(node.get_string(ACI).unwrap_or_default())?;
    AclResource::new(
        name,
        rights,
        entries,
        node.get_string(DESCRIPTION).map(str::to_string),
    )
}

/// Stage `resource` in the pending tree, replacing any previous version.
pub fn write_resource(store: &mut ConfigStore, resource: &AclResource) {
    let node = store.make_sub_store(&[AUTHZ, ACLS, resource.name()]);
    node.put_string(RIGHTS, resource.rights().to_string());
    node.put_string(ACI, resource.aci_list());
    match resource.description() {
        Some(description) => node.put_string(DESCRIPTION, description),
        None => {
            node.remove_string(DESCRIPTION);
        }
    }
}

pub fn remove_resource(store: &mut ConfigStore, name: &str) -> bool {
    store.remove_sub_store(&[AUTHZ, ACLS, name])
}

pub fn write_evaluator(store: &mut ConfigStore, evaluator_type: &str, implementation: &str) {
    store
        .make_sub_store(&[AUTHZ, EVALUATORS, evaluator_type])
        .put_string(IMPLEMENTATION, implementation);
}

pub fn remove_evaluator(store: &mut ConfigStore, evaluator_type: &str) -> bool {
    store.remove_sub_store(&[AUTHZ, EVALUATORS, evaluator_type])
}

/// Seed an empty store from the `.kdl` files in `dir` and commit it.
///
/// Returns `false` without touching anything when the store already holds
/// authorization configuration.
pub fn seed_store(store: &mut ConfigStore, dir: &Path) -> Result<bool, AuthzError> {
    if store.get_sub_store(&[AUTHZ]).is_some() {
        return Ok(false);
    }

    let parsed = read_policy_dir(dir)?;
    let snapshot = compile_policies(parsed)?;

    for (evaluator_type, evaluator) in snapshot.evaluators.iter() {
        write_evaluator(store, evaluator_type, evaluator.implementation());
    }
    for resource in snapshot.resources.values() {
        write_resource(store, resource);
    }
    if let Err(e) = store.commit(true) {
        store.rollback();
        return Err(e.into());
    }

    tracing::info!(
        dir = %dir.display(),
        resources = snapshot.resources.len(),
        evaluators = snapshot.evaluators.len(),
        "Seeded ACL configuration from bootstrap policies"
    );
    Ok(true)
}

/// Parse all `.kdl` files in `dir`, in file name order.
pub fn read_policy_dir(dir: &Path) -> Result<Vec<ParsedPolicy>, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    let mut all_parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        all_parsed.push(parse_kdl_document(&contents)?);
    }
    Ok(all_parsed)
}

/// Merge and validate parsed policies. Later definitions of the same ACL or
/// evaluator type replace earlier ones.
pub fn compile_policies(parsed: Vec<ParsedPolicy>) -> Result<AclSnapshot, AuthzError> {
    let mut snapshot = AclSnapshot::default();

    for p in parsed {
        for def in p.evaluators {
            let evaluator = build_evaluator(&def.implementation)?;
            snapshot.evaluators.register(def.evaluator_type, evaluator);
        }
        for def in p.acls {
            let rights = Rights::from_tokens(&def.rights)?;
            let entries = def
                .acis
                .iter()
                .map(|s| parse_aci(s))
                .collect::<Result<Vec<_>, _>>()?;
            let resource = AclResource::new(def.name.clone(), rights, entries, def.description)?;
            snapshot.resources.insert(def.name, Arc::new(resource));
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileBackend, MemoryBackend};

    const CONFIG_POLICY: &str = r#"
evaluator "user" implementation="user"
evaluator "group" implementation="group"

acl "certServer.acl.configuration" {
    description "ACL configuration"
    rights {
        - "read"
        - "modify"
    }
    aci "read,modify allow group=\"Administrators\""
}
"#;

    fn config_acl() -> ParsedPolicy {
        ParsedPolicy {
            acls: vec![AclDefinition {
                name: "certServer.acl.configuration".into(),
                description: Some("ACL configuration".into()),
                rights: vec!["read".into(), "modify".into()],
                acis: vec![r#"read,modify allow group="Administrators""#.into()],
            }],
            evaluators: vec![EvaluatorDefinition {
                evaluator_type: "group".into(),
                implementation: "group".into(),
            }],
        }
    }

    #[test]
    fn test_compile_basic() {
        let snapshot = compile_policies(vec![config_acl()]).unwrap();
        assert_eq!(snapshot.resources.len(), 1);
        assert_eq!(snapshot.evaluators.len(), 1);
        let res = &snapshot.resources["certServer.acl.configuration"];
        assert_eq!(res.entries().len(), 1);
    }

    #[test]
    fn test_compile_rejects_undeclared_right() {
        let mut parsed = config_acl();
        parsed.acls[0].acis.push(r#"delete allow user="admin""#.into());
        let err = compile_policies(vec![parsed]).unwrap_err();
        assert!(matches!(err, AuthzError::UndeclaredRight { .. }));
    }

    #[test]
    fn test_compile_rejects_unknown_implementation() {
        let mut parsed = config_acl();
        parsed.evaluators[0].implementation = "ldap".into();
        let err = compile_policies(vec![parsed]).unwrap_err();
        assert!(matches!(err, AuthzError::UnknownImplementation(_)));
    }

    #[test]
    fn test_store_round_trip() {
        let mut store = ConfigStore::in_memory();
        let snapshot = compile_policies(vec![config_acl()]).unwrap();
        for (ty, ev) in snapshot.evaluators.iter() {
            write_evaluator(&mut store, ty, ev.implementation());
        }
        for res in snapshot.resources.values() {
            write_resource(&mut store, res);
        }

        let loaded = load_snapshot(&store).unwrap();
        assert_eq!(
            loaded.resources["certServer.acl.configuration"],
            snapshot.resources["certServer.acl.configuration"]
        );
        assert!(loaded.evaluators.get("group").is_some());

        assert!(remove_resource(&mut store, "certServer.acl.configuration"));
        assert!(remove_evaluator(&mut store, "group"));
        let emptied = load_snapshot(&store).unwrap();
        assert!(emptied.resources.is_empty());
        assert!(emptied.evaluators.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_stored_aci() {
        let mut store = ConfigStore::in_memory();
        let node = store.make_sub_store(&[AUTHZ, ACLS, "broken"]);
        node.put_string(RIGHTS, "read");
        node.put_string(ACI, "read allow user=");
        let err = load_snapshot(&store).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidAci { .. }));
    }

    #[test]
    fn test_seed_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10-config.kdl"), CONFIG_POLICY).unwrap();
        std::fs::write(
            dir.path().join("20-ca.kdl"),
            r#"
acl "certServer.ca.certificate" {
    rights {
        - "read"
        - "revoke"
    }
    aci "read allow user=\"anybody\""
    aci "revoke allow group=\"Certificate Manager Agents\""
}
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a policy").unwrap();

        let store_path = dir.path().join("store.json");
        let mut store = ConfigStore::open(FileBackend::new(&store_path)).unwrap();
        assert!(seed_store(&mut store, dir.path()).unwrap());
        // second run leaves the store alone
        assert!(!seed_store(&mut store, dir.path()).unwrap());

        let reopened = ConfigStore::open(FileBackend::new(&store_path)).unwrap();
        let snapshot = load_snapshot(&reopened).unwrap();
        let names: Vec<_> = snapshot.resources.keys().cloned().collect();
        assert_eq!(
            names,
            vec!["certServer.acl.configuration", "certServer.ca.certificate"]
        );
        assert_eq!(snapshot.resources["certServer.ca.certificate"].entries().len(), 2);
    }

    #[test]
    fn test_seed_skips_configured_store() {
        let mut tree = SubStore::new();
        tree.make_sub_store(AUTHZ);
        let mut store = ConfigStore::open(MemoryBackend::with_tree(tree)).unwrap();
        let missing = Path::new("/nonexistent/path");
        assert!(!seed_store(&mut store, missing).unwrap());
    }

    #[test]
    fn test_read_nonexistent_directory() {
        let err = read_policy_dir(Path::new("/nonexistent/path")).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidPolicy(_)));
    }
}
