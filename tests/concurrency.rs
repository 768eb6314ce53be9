mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use certacl::authz::types::IndeterminateReason;
use certacl::authz::{AuthorizationManager, Decision, Principal};
use certacl::store::ConfigStore;
use helpers::{AclBuilder, FailingBackend, TestStore};

const RESOURCE: &str = "certServer.ca.certificate";

const OLD_ACIS: &str = r#"read allow group="Agents""#;
const NEW_ACIS: &str = r#"read,revoke deny user="carol";read,revoke allow group="Agents""#;

fn flip(manager: &AuthorizationManager, new: bool) {
    let result = if new {
        manager.update_acls(RESOURCE, "read,revoke", NEW_ACIS, Some("new"))
    } else {
        manager.update_acls(RESOURCE, "read", OLD_ACIS, Some("old"))
    };
    result.unwrap();
}

#[test]
fn test_readers_never_see_a_mixed_version() {
    let manager = Arc::new(AuthorizationManager::open(ConfigStore::in_memory()).unwrap());
    manager.add_evaluator("user", "user").unwrap();
    manager.add_evaluator("group", "group").unwrap();
    flip(&manager, false);

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let manager = manager.clone();
        let done = done.clone();
        thread::spawn(move || {
            for i in 0..500 {
                flip(&manager, i % 2 == 0);
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            let done = done.clone();
            thread::spawn(move || {
                let dave = Principal::new("dave").with_groups(["Agents"]);
                let carol = Principal::new("carol").with_groups(["Agents"]);
                let mut checks = 0u64;
                while !done.load(Ordering::SeqCst) || checks < 100 {
                    // every decision taken from one snapshot belongs to one version
                    let snapshot = manager.snapshot();
                    let acl = snapshot.resources.get(RESOURCE).unwrap();
                    let observed = (
                        snapshot.decide(&carol, RESOURCE, "read"),
                        snapshot.decide(&dave, RESOURCE, "revoke"),
                        snapshot.decide(&dave, RESOURCE, "read"),
                    );
                    match acl.description() {
                        Some("old") => {
                            assert_eq!(acl.rights().len(), 1);
                            assert_eq!(acl.entries().len(), 1);
                            assert_eq!(
                                observed,
                                (
                                    Decision::Allow,
                                    Decision::Indeterminate(IndeterminateReason::UndeclaredRight),
                                    Decision::Allow,
                                )
                            );
                        }
                        Some("new") => {
                            assert_eq!(acl.rights().len(), 2);
                            assert_eq!(acl.entries().len(), 2);
                            assert_eq!(observed, (Decision::Deny, Decision::Allow, Decision::Allow));
                        }
                        other => panic!("unexpected description {other:?}"),
                    }

                    // live calls may straddle a swap but must each match some version
                    let carol_read = manager.authorize(&carol, RESOURCE, "read");
                    assert!(matches!(carol_read, Decision::Allow | Decision::Deny));
                    let dave_revoke = manager.authorize(&dave, RESOURCE, "revoke");
                    assert!(matches!(
                        dave_revoke,
                        Decision::Allow | Decision::Indeterminate(IndeterminateReason::UndeclaredRight)
                    ));
                    assert_eq!(manager.authorize(&dave, RESOURCE, "read"), Decision::Allow);
                    checks += 1;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_writers_are_serialized() {
    let manager = Arc::new(AuthorizationManager::open(ConfigStore::in_memory()).unwrap());
    let writers: Vec<_> = (0..8)
        .map(|n| {
            let manager = manager.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    AclBuilder::new(&format!("certServer.resource.{n}.{i}")).create(&manager);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    assert_eq!(manager.list_resources().len(), 200);
}

#[test]
fn test_committed_changes_survive_restart() {
    let store = TestStore::new();
    {
        let manager = store.manager();
        manager.add_evaluator("group", "group").unwrap();
        AclBuilder::new(RESOURCE)
            .rights(&["read", "revoke"])
            .aci(r#"revoke allow group="Agents""#)
            .description("Certificates")
            .create(&manager);
    }

    let manager = store.manager();
    let agent = Principal::new("dave").with_groups(["Agents"]);
    assert_eq!(manager.authorize(&agent, RESOURCE, "revoke"), Decision::Allow);
    assert_eq!(
        manager.get_acl(RESOURCE).unwrap().description(),
        Some("Certificates")
    );
    assert!(store.path().exists());
}

#[test]
fn test_failed_commit_leaves_live_state_untouched() {
    let manager = AuthorizationManager::open(ConfigStore::open(FailingBackend).unwrap()).unwrap();
    assert!(manager
        .update_acls(RESOURCE, "read", r#"read allow user="anybody""#, None)
        .is_err());
    assert!(manager.add_evaluator("user", "user").is_err());
    assert!(manager.list_resources().is_empty());
    assert!(manager.list_evaluators().is_empty());
    assert!(matches!(
        manager.authorize(&Principal::new("dave"), RESOURCE, "read"),
        Decision::Indeterminate(_)
    ));
}
