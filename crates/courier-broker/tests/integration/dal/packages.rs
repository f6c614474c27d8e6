/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::fixtures::TestFixture;
use courier_broker::dal::PackageRemoval;
use courier_broker::rollout::ports::PackageStore;
use courier_broker::rollout::RolloutError;

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_create_links_to_previous_latest() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();

    let first = fixture.insert_version(&app, "1.9.0");
    assert_eq!(first.replaces_version_id, None);
    assert!(first.is_active);

    let second = fixture.insert_version(&app, "1.10.0");
    assert_eq!(second.replaces_version_id, Some(first.id));
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_duplicate_version_is_a_conflict() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let existing = fixture.insert_version(&app, "2.0.0");

    let duplicate = courier_models::models::package_versions::NewPackageVersion::new(
        app.id,
        "2.0.0".to_string(),
        existing.content_hash.clone(),
        existing.size_bytes,
        existing.storage_path.clone(),
        true,
        None,
        None,
    )
    .unwrap();

    let err = fixture.dal.packages().create(&duplicate).unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)), "got {:?}", err);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_list_and_latest_use_version_ordering() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    fixture.insert_version(&app, "1.9.3");
    let newest = fixture.insert_version(&app, "1.10.0");
    fixture.insert_version(&app, "1.2");
    let beta = fixture.insert_version_with(&app, "2.0.0-beta", false, None);

    let listed: Vec<String> = fixture
        .dal
        .packages()
        .list_for_application(app.id, false)
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(listed, vec!["2.0.0-beta", "1.10.0", "1.9.3", "1.2"]);

    let packages = fixture.dal.packages();
    assert_eq!(packages.get_latest(app.id, false).unwrap().unwrap().id, beta.id);
    assert_eq!(packages.get_latest(app.id, true).unwrap().unwrap().id, newest.id);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_remove_unreferenced_version_deletes_it() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");

    let outcome = fixture.dal.packages().remove(version.id).unwrap();
    assert!(matches!(outcome, PackageRemoval::Deleted(v) if v.id == version.id));
    assert!(fixture.dal.packages().get(version.id).unwrap().is_none());
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_remove_referenced_version_only_deactivates() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-REMOVE");
    fixture.deploy(&version, &[&machine], false);

    let outcome = fixture.dal.packages().remove(version.id).unwrap();
    assert!(matches!(outcome, PackageRemoval::Deactivated(ref v) if !v.is_active));

    let kept = fixture.dal.packages().get(version.id).unwrap().unwrap();
    assert!(!kept.is_active);
    assert!(fixture
        .dal
        .packages()
        .list_for_application(app.id, false)
        .unwrap()
        .is_empty());
    assert_eq!(
        fixture
            .dal
            .packages()
            .list_for_application(app.id, true)
            .unwrap()
            .len(),
        1
    );
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_record_download() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-DOWNLOAD");

    let packages = fixture.dal.packages();
    packages
        .record_download(version.id, machine.id, version.size_bytes, true)
        .unwrap();
    packages.record_download(version.id, machine.id, 0, false).unwrap();

    let downloads = packages.list_downloads(version.id).unwrap();
    assert_eq!(downloads.len(), 2);
    assert_eq!(downloads.iter().filter(|d| d.success).count(), 1);
    assert!(downloads.iter().all(|d| d.machine_id == machine.id));
}
