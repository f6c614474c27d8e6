/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::fixtures::TestFixture;
use courier_broker::dal::PackageRemoval;
use courier_broker::rollout::planner::{self, DeploymentRequest, TargetSpec};
use courier_broker::rollout::RolloutError;
use courier_models::models::deployment_histories::{DeploymentStatus, DeploymentType};
use courier_models::models::deployment_tasks::TaskStatus;
use courier_models::models::failure::FailureKind;

fn targeted(package_version_id: i64, targets: Vec<String>) -> DeploymentRequest {
    DeploymentRequest {
        package_version_id,
        environment: "production".to_string(),
        deployment_type: DeploymentType::Release,
        targets: TargetSpec::Identifiers(targets),
        requires_approval: false,
        initiated_by: "ops@example.com".to_string(),
        priority: Some(5),
        scheduled_for: None,
        max_retries: None,
    }
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_targeted_deployment_records_skipped_targets() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let a = fixture.insert_machine("WS-PLAN-A");
    let b = fixture.insert_machine("WS-PLAN-B");

    let request = targeted(
        version.id,
        vec![a.machine_key.clone(), "unknown-box".to_string(), b.machine_key.clone()],
    );
    let history = fixture.dal.deployments().plan_and_create(&request).unwrap();

    assert_eq!(history.status, DeploymentStatus::Pending);
    assert_eq!(history.total_targets, 2);
    assert_eq!(history.pending_count, 2);
    assert_eq!(history.skipped_targets(), vec!["unknown-box".to_string()]);
    assert_eq!(history.planned_machine_ids(), vec![a.id, b.id]);
    assert!(history.counters_balance());

    let tasks = fixture.dal.deployments().list_tasks(history.id).unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Queued));
    assert!(tasks.iter().all(|t| t.priority == 5 && t.max_retries == 3));
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_planning_errors() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let deployments = fixture.dal.deployments();

    let err = deployments
        .plan_and_create(&targeted(version.id, vec!["nobody-here".to_string()]))
        .unwrap_err();
    assert!(matches!(err, RolloutError::NoEligibleTargets(_)), "got {:?}", err);

    let err = deployments
        .plan_and_create(&targeted(i64::MAX, vec!["nobody-here".to_string()]))
        .unwrap_err();
    assert!(matches!(err, RolloutError::InvalidPackageVersion(_)), "got {:?}", err);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_version_deactivated_after_planning_is_not_deployed() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let a = fixture.insert_machine("WS-RACE-A");
    let b = fixture.insert_machine("WS-RACE-B");
    fixture.deploy(&version, &[&a], false);

    let dal = &fixture.dal;
    let plan = planner::plan(
        &targeted(version.id, vec![b.machine_key.clone()]),
        &dal.packages(),
        &dal.machines(),
        dal.settings.plan_defaults,
    )
    .unwrap();

    let removal = dal.packages().remove(version.id).unwrap();
    assert!(matches!(removal, PackageRemoval::Deactivated(_)));

    let err = dal.deployments().create(&plan).unwrap_err();
    assert!(matches!(err, RolloutError::InvalidPackageVersion(id) if id == version.id), "got {:?}", err);
    let deployments = dal.deployments().list(Some(app.id), None).unwrap();
    assert_eq!(deployments.len(), 1);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_approval_of_deactivated_version_is_refused() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-APPROVE-GONE");

    let held = fixture.deploy(&version, &[&machine], true);
    let removal = fixture.dal.packages().remove(version.id).unwrap();
    assert!(matches!(removal, PackageRemoval::Deactivated(_)));

    let err = fixture.dal.deployments().approve(held.id, "lead@example.com").unwrap_err();
    assert!(matches!(err, RolloutError::InvalidPackageVersion(_)), "got {:?}", err);
    let still_held = fixture.dal.deployments().require(held.id).unwrap();
    assert_eq!(still_held.status, DeploymentStatus::PendingApproval);
    assert!(fixture.dal.deployments().list_tasks(held.id).unwrap().is_empty());
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_approval_creates_tasks_for_planned_machines() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-APPROVE");

    let held = fixture.deploy(&version, &[&machine], true);
    assert_eq!(held.status, DeploymentStatus::PendingApproval);
    assert!(fixture.dal.deployments().list_tasks(held.id).unwrap().is_empty());

    let err = fixture.dal.deployments().approve(held.id, "  ").unwrap_err();
    assert!(matches!(err, RolloutError::Validation(_)));

    let approved = fixture.dal.deployments().approve(held.id, "lead@example.com").unwrap();
    assert_eq!(approved.status, DeploymentStatus::Pending);
    assert_eq!(approved.approved_by.as_deref(), Some("lead@example.com"));
    assert!(approved.approved_at.is_some());

    let tasks = fixture.dal.deployments().list_tasks(held.id).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].machine_id, machine.id);

    let err = fixture.dal.deployments().approve(held.id, "lead@example.com").unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)));
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_cancel_moves_queued_share_into_failed() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let a = fixture.insert_machine("WS-CANCEL-A");
    let b = fixture.insert_machine("WS-CANCEL-B");
    let deployment = fixture.deploy(&version, &[&a, &b], false);

    let tasks = fixture.dal.deployments().list_tasks(deployment.id).unwrap();
    let running = tasks.iter().find(|t| t.machine_id == a.id).unwrap();
    fixture.dal.tasks().claim(running.id, &a.machine_key).unwrap();

    let cancelled = fixture.dal.deployments().cancel(deployment.id).unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
    assert_eq!(cancelled.failed_count, 1);
    assert_eq!(cancelled.pending_count, 1);
    assert!(cancelled.completed_at.is_some());
    assert!(cancelled.counters_balance());

    let tasks = fixture.dal.deployments().list_tasks(deployment.id).unwrap();
    let queued = tasks.iter().find(|t| t.machine_id == b.id).unwrap();
    assert_eq!(queued.status, TaskStatus::Cancelled);
    assert_eq!(queued.failure_kind, Some(FailureKind::Cancelled));
    let in_flight = tasks.iter().find(|t| t.machine_id == a.id).unwrap();
    assert_eq!(in_flight.status, TaskStatus::InProgress);

    let err = fixture.dal.deployments().cancel(deployment.id).unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)));
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_cancel_pending_approval_moves_whole_share() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let a = fixture.insert_machine("WS-HELD-A");
    let b = fixture.insert_machine("WS-HELD-B");
    let held = fixture.deploy(&version, &[&a, &b], true);

    let cancelled = fixture.dal.deployments().cancel(held.id).unwrap();
    assert_eq!(cancelled.failed_count, 2);
    assert_eq!(cancelled.pending_count, 0);
    assert!(cancelled.counters_balance());
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_rollback_targets_predecessor_on_original_machines() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let v1 = fixture.insert_version(&app, "1.0.0");
    let v2 = fixture.insert_version(&app, "1.1.0");
    let machine = fixture.insert_machine("WS-ROLLBACK");
    let bystander = fixture.insert_machine("WS-BYSTANDER");

    let original = fixture.deploy(&v2, &[&machine], false);
    let rollback = fixture
        .dal
        .deployments()
        .rollback(original.id, "oncall@example.com")
        .unwrap();

    assert_eq!(rollback.deployment_type, DeploymentType::Rollback);
    assert_eq!(rollback.package_version_id, v1.id);
    assert_eq!(rollback.planned_machine_ids(), vec![machine.id]);
    assert!(!rollback.planned_machine_ids().contains(&bystander.id));
    assert!(rollback.priority > original.priority);

    let first = fixture.deploy(&v1, &[&machine], false);
    let err = fixture
        .dal
        .deployments()
        .rollback(first.id, "oncall@example.com")
        .unwrap_err();
    assert!(matches!(err, RolloutError::Validation(_)), "got {:?}", err);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_list_filters_by_application_and_status() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let other = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let other_version = fixture.insert_version(&other, "1.0.0");
    let machine = fixture.insert_machine("WS-LIST");

    let held = fixture.deploy(&version, &[&machine], true);
    let live = fixture.deploy(&version, &[&machine], false);
    fixture.deploy(&other_version, &[&machine], false);

    let for_app = fixture.dal.deployments().list(Some(app.id), None).unwrap();
    let ids: Vec<i64> = for_app.iter().map(|d| d.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&held.id) && ids.contains(&live.id));

    let awaiting = fixture
        .dal
        .deployments()
        .list(Some(app.id), Some(DeploymentStatus::PendingApproval))
        .unwrap();
    assert_eq!(awaiting.len(), 1);
    assert_eq!(awaiting[0].id, held.id);
}
