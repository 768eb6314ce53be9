mod helpers;

use std::path::PathBuf;

use certacl::authz::{Decision, Principal, ACL_CONFIG_RESOURCE};
use certacl::settings::Settings;
use chrono::{TimeZone, Utc};
use helpers::TestStore;

fn shipped_policies() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("policies")
}

fn settings_for(store: &TestStore) -> Settings {
    let mut settings = Settings::default();
    settings.store.path = store.path().to_path_buf();
    settings.store.sync = false;
    settings.authz.bootstrap_dir = shipped_policies();
    settings
}

#[test]
fn test_first_start_seeds_shipped_policies() {
    let store = TestStore::new();
    let manager = certacl::web::init_manager(&settings_for(&store)).unwrap();

    let evaluators: Vec<_> = manager
        .list_evaluators()
        .into_iter()
        .map(|e| e.evaluator_type)
        .collect();
    assert_eq!(evaluators, vec!["user", "group", "ipaddress", "time"]);

    let resources: Vec<_> = manager.list_resources().into_iter().map(|r| r.name).collect();
    assert_eq!(
        resources,
        vec![
            ACL_CONFIG_RESOURCE,
            "certServer.ca.certificate",
            "certServer.ca.request.profile",
        ]
    );

    let admin = Principal::new("admin").with_groups(["Administrators"]);
    assert_eq!(manager.authorize(&admin, ACL_CONFIG_RESOURCE, "modify"), Decision::Allow);
}

#[test]
fn test_time_window_from_shipped_policies() {
    let store = TestStore::new();
    let manager = certacl::web::init_manager(&settings_for(&store)).unwrap();
    let resource = "certServer.ca.request.profile";

    let agent = Principal::new("agent").with_groups(["Certificate Manager Agents"]);
    let day = agent
        .clone()
        .at(Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap());
    let night = agent.at(Utc.with_ymd_and_hms(2024, 3, 4, 23, 15, 0).unwrap());

    assert_eq!(manager.authorize(&day, resource, "approve"), Decision::Allow);
    assert!(!manager.is_allowed(&night, resource, "approve"));
    assert!(manager.is_allowed(&Principal::new("anyone"), resource, "submit"));
}

#[test]
fn test_restart_keeps_admin_changes() {
    let store = TestStore::new();
    let settings = settings_for(&store);
    {
        let manager = certacl::web::init_manager(&settings).unwrap();
        manager.delete_acl("certServer.ca.certificate").unwrap();
        assert!(manager.unregister_evaluator("time").unwrap());
    }

    // the store is no longer empty, so bootstrap policies are not re-applied
    let manager = certacl::web::init_manager(&settings).unwrap();
    assert!(manager.get_acl("certServer.ca.certificate").is_none());
    assert_eq!(manager.list_evaluators().len(), 3);
}

#[test]
fn test_missing_bootstrap_dir_starts_empty() {
    let store = TestStore::new();
    let mut settings = settings_for(&store);
    settings.authz.bootstrap_dir = store.dir().join("no-such-dir");

    let manager = certacl::web::init_manager(&settings).unwrap();
    assert!(manager.list_resources().is_empty());
}
