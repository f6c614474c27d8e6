/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::fixtures::TestFixture;
use chrono::{Duration, Utc};
use courier_broker::rollout::planner::{DeploymentRequest, TargetSpec};
use courier_broker::rollout::RolloutError;
use courier_broker::utils::background_tasks::run_maintenance;
use courier_models::models::client_machines::MachineStatus;
use courier_models::models::deployment_histories::{DeploymentStatus, DeploymentType};
use courier_models::models::deployment_tasks::TaskStatus;
use courier_models::models::failure::FailureKind;
use courier_models::models::manifests::UpdatePolicy;
use courier_models::schema::{client_machines, deployment_tasks};
use courier_models::wire::TaskStatusReport;
use diesel::prelude::*;

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_pending_queue_orders_by_priority_and_carries_manifest() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let v1 = fixture.insert_version(&app, "1.0.0");
    let v2 = fixture.insert_version(&app, "1.1.0");
    let manifest = fixture.insert_manifest(
        &app,
        &v2,
        UpdatePolicy::Selective,
        vec!["data/user.db".to_string()],
    );
    fixture.dal.manifests().activate(manifest.id).unwrap();
    let machine = fixture.insert_machine("WS-QUEUE");

    let low = fixture.deploy(&v1, &[&machine], false);
    let high = fixture
        .dal
        .deployments()
        .plan_and_create(&DeploymentRequest {
            package_version_id: v2.id,
            environment: "production".to_string(),
            deployment_type: DeploymentType::Hotfix,
            targets: TargetSpec::Identifiers(vec![machine.machine_key.clone()]),
            requires_approval: false,
            initiated_by: "ops@example.com".to_string(),
            priority: Some(10),
            scheduled_for: None,
            max_retries: None,
        })
        .unwrap();
    assert!(high.priority > low.priority);

    let queue = fixture
        .dal
        .tasks()
        .pending_for_machine(&machine.machine_key)
        .unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].deployment_id, high.id);
    assert_eq!(queue[1].deployment_id, low.id);
    assert_eq!(queue[0].app_code, app.code);
    assert_eq!(queue[0].content_hash, v2.content_hash);
    assert_eq!(queue[0].deployment_type, DeploymentType::Hotfix);
    assert_eq!(queue[0].update_policy, UpdatePolicy::Selective);
    assert_eq!(queue[0].preserved_paths, vec!["data/user.db".to_string()]);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_scheduled_tasks_wait_for_their_time() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-LATER");
    let deployment = fixture.deploy(&version, &[&machine], false);
    let later = Utc::now() + Duration::hours(2);
    {
        let conn = &mut fixture.dal.pool.get().unwrap();
        diesel::update(
            deployment_tasks::table.filter(deployment_tasks::deployment_id.eq(deployment.id)),
        )
        .set(deployment_tasks::scheduled_for.eq(Some(later)))
        .execute(conn)
        .unwrap();
    }

    let tasks = fixture.dal.tasks();
    assert!(tasks.pending_for_machine(&machine.machine_key).unwrap().is_empty());
    let eventually = tasks
        .pending_for_machine_at(&machine.machine_key, later + Duration::seconds(1))
        .unwrap();
    assert_eq!(eventually.len(), 1);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_successful_task_settles_deployment() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-SUCCESS");
    let deployment = fixture.deploy(&version, &[&machine], false);
    let task_id = fixture.dal.deployments().list_tasks(deployment.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();

    let claimed = tasks.claim(task_id, &machine.machine_key).unwrap();
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert_eq!(claimed.progress_percentage, 0);
    let busy = fixture.dal.machines().get(machine.id).unwrap().unwrap();
    assert_eq!(busy.status, MachineStatus::Busy);
    let started = fixture.dal.deployments().require(deployment.id).unwrap();
    assert_eq!(started.status, DeploymentStatus::InProgress);
    assert!(started.started_at.is_some());

    let progress = tasks
        .report(task_id, &TaskStatusReport::progress(40, "downloading"))
        .unwrap();
    assert!(progress.response.accepted);
    assert!(progress.settled.is_none());

    let err = tasks
        .report(task_id, &TaskStatusReport::progress(20, "downloading"))
        .unwrap_err();
    assert!(matches!(
        err,
        RolloutError::ProgressRegression {
            current: 40,
            reported: 20
        }
    ));

    let done = tasks
        .report(task_id, &TaskStatusReport::completed(Some(version.size_bytes)))
        .unwrap();
    assert_eq!(done.task.status, TaskStatus::Completed);
    assert_eq!(done.task.progress_percentage, 100);
    let settled = done.settled.expect("deployment settles");
    assert_eq!(settled.status, DeploymentStatus::Success);
    assert_eq!(settled.success_count, 1);
    assert_eq!(settled.pending_count, 0);
    assert!(settled.completed_at.is_some());

    let idle = fixture.dal.machines().get(machine.id).unwrap().unwrap();
    assert_eq!(idle.status, MachineStatus::Online);

    let err = tasks
        .report(task_id, &TaskStatusReport::completed(None))
        .unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)));
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_failure_retries_then_fails_terminally() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let ok = fixture.insert_machine("WS-PARTIAL-OK");
    let flaky = fixture.insert_machine("WS-PARTIAL-FLAKY");
    let deployment = fixture.deploy(&version, &[&ok, &flaky], false);
    let listed = fixture.dal.deployments().list_tasks(deployment.id).unwrap();
    let ok_task = listed.iter().find(|t| t.machine_id == ok.id).unwrap().id;
    let flaky_task = listed.iter().find(|t| t.machine_id == flaky.id).unwrap().id;
    let tasks = fixture.dal.tasks();

    tasks.claim(ok_task, &ok.machine_key).unwrap();
    tasks.report(ok_task, &TaskStatusReport::completed(None)).unwrap();

    tasks.claim(flaky_task, &flaky.machine_key).unwrap();
    let failure = TaskStatusReport::failed(FailureKind::TransientNetwork, "timeout".into(), 30);
    let retry = tasks.report(flaky_task, &failure).unwrap();
    assert!(retry.response.accepted);
    assert_eq!(retry.task.status, TaskStatus::Retrying);
    assert_eq!(retry.task.retry_count, 1);
    let next = retry.task.next_retry_at.expect("backoff is scheduled");
    assert!(retry.settled.is_none());

    assert!(tasks.pending_for_machine(&flaky.machine_key).unwrap().is_empty());
    assert!(matches!(
        tasks.claim(flaky_task, &flaky.machine_key).unwrap_err(),
        RolloutError::Conflict(_)
    ));
    let due = tasks
        .pending_for_machine_at(&flaky.machine_key, next + Duration::seconds(1))
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].retry_count, 1);

    {
        let conn = &mut fixture.dal.pool.get().unwrap();
        diesel::update(deployment_tasks::table.find(flaky_task))
            .set(deployment_tasks::next_retry_at.eq(Some(Utc::now() - Duration::seconds(1))))
            .execute(conn)
            .unwrap();
    }
    tasks.claim(flaky_task, &flaky.machine_key).unwrap();
    let last = tasks.report(flaky_task, &failure).unwrap();
    assert_eq!(last.task.status, TaskStatus::Failed);
    assert_eq!(last.task.failure_kind, Some(FailureKind::TransientNetwork));

    let settled = last.settled.expect("deployment settles");
    assert_eq!(settled.status, DeploymentStatus::PartialFailure);
    assert_eq!(settled.success_count, 1);
    assert_eq!(settled.failed_count, 1);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_integrity_failure_is_terminal_with_retries_left() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-CORRUPT");
    let deployment = fixture.deploy(&version, &[&machine], false);
    let task_id = fixture.dal.deployments().list_tasks(deployment.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();

    tasks.claim(task_id, &machine.machine_key).unwrap();
    let report = TaskStatusReport::failed(
        FailureKind::Integrity,
        "hash mismatch after 3 downloads".into(),
        20,
    );
    assert!(!report.retryable);
    let result = tasks.report(task_id, &report).unwrap();

    assert_eq!(result.task.status, TaskStatus::Failed);
    assert_eq!(result.task.retry_count, 0);
    assert!(result.task.retry_count < result.task.max_retries);
    assert_eq!(result.task.failure_kind, Some(FailureKind::Integrity));
    let settled = result.settled.unwrap();
    assert_eq!(settled.status, DeploymentStatus::Failed);
    assert_eq!(settled.failed_count, 1);
    assert_eq!(settled.pending_count, 0);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_claim_conflicts() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-CLAIM");
    let stranger = fixture.insert_machine("WS-STRANGER");
    let first = fixture.deploy(&version, &[&machine], false);
    let second = fixture.deploy(&version, &[&machine], false);
    let first_task = fixture.dal.deployments().list_tasks(first.id).unwrap()[0].id;
    let second_task = fixture.dal.deployments().list_tasks(second.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();

    let err = tasks.claim(first_task, &stranger.machine_key).unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)));

    let err = tasks
        .report(first_task, &TaskStatusReport::progress(10, "x"))
        .unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)));

    tasks.claim(first_task, &machine.machine_key).unwrap();
    let err = tasks.claim(first_task, &machine.machine_key).unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)));
    let err = tasks.claim(second_task, &machine.machine_key).unwrap_err();
    assert!(matches!(err, RolloutError::Conflict(_)));
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_cancelled_deployment_asks_running_agent_to_abort() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-ABORT");
    let deployment = fixture.deploy(&version, &[&machine], false);
    let task_id = fixture.dal.deployments().list_tasks(deployment.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();

    tasks.claim(task_id, &machine.machine_key).unwrap();
    tasks
        .report(task_id, &TaskStatusReport::progress(30, "installing"))
        .unwrap();
    fixture.dal.deployments().cancel(deployment.id).unwrap();

    let answer = tasks
        .report(task_id, &TaskStatusReport::progress(50, "installing"))
        .unwrap();
    assert!(!answer.response.accepted);
    assert!(answer.response.cancel_requested);
    assert_eq!(answer.task.progress_percentage, 30);

    let aborted = tasks
        .report(
            task_id,
            &TaskStatusReport::failed(FailureKind::Cancelled, "aborted".into(), 50),
        )
        .unwrap();
    assert!(aborted.response.accepted);
    assert_eq!(aborted.task.status, TaskStatus::Cancelled);

    let history = fixture.dal.deployments().require(deployment.id).unwrap();
    assert_eq!(history.status, DeploymentStatus::Cancelled);
    assert_eq!(history.failed_count, 1);
    assert_eq!(history.pending_count, 0);
    assert!(history.counters_balance());
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_cancelled_task_outcome_frees_machine_for_next_deployment() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let first = fixture.insert_version(&app, "1.0.0");
    let second = fixture.insert_version(&app, "1.1.0");
    let machine = fixture.insert_machine("WS-RELEASE");
    let cancelled = fixture.deploy(&first, &[&machine], false);
    let running = fixture.dal.deployments().list_tasks(cancelled.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();

    tasks.claim(running, &machine.machine_key).unwrap();
    fixture.dal.deployments().cancel(cancelled.id).unwrap();

    let next = fixture.deploy(&second, &[&machine], false);
    let next_task = fixture.dal.deployments().list_tasks(next.id).unwrap()[0].id;
    assert!(matches!(
        tasks.claim(next_task, &machine.machine_key).unwrap_err(),
        RolloutError::Conflict(_)
    ));

    let outcome = tasks
        .report(running, &TaskStatusReport::completed(None))
        .unwrap();
    assert!(outcome.response.accepted);
    let stored = fixture.dal.machines().get(machine.id).unwrap().unwrap();
    assert_eq!(stored.status, MachineStatus::Online);

    let claimed = tasks.claim(next_task, &machine.machine_key).unwrap();
    assert_eq!(claimed.status, TaskStatus::InProgress);
    let history = fixture.dal.deployments().require(cancelled.id).unwrap();
    assert_eq!(history.status, DeploymentStatus::Cancelled);
    assert_eq!(history.pending_count, 0);
    assert!(history.counters_balance());
}

fn age_heartbeat(fixture: &TestFixture, machine_id: i64) {
    let conn = &mut fixture.dal.pool.get().unwrap();
    diesel::update(client_machines::table.find(machine_id))
        .set(client_machines::last_heartbeat.eq(Some(Utc::now() - Duration::hours(1))))
        .execute(conn)
        .unwrap();
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_maintenance_closes_task_of_crashed_agent_after_cancel() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let first = fixture.insert_version(&app, "1.0.0");
    let second = fixture.insert_version(&app, "1.1.0");
    let machine = fixture.insert_machine("WS-CRASHED");
    let deployment = fixture.deploy(&first, &[&machine], false);
    let task_id = fixture.dal.deployments().list_tasks(deployment.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();

    tasks.claim(task_id, &machine.machine_key).unwrap();
    tasks
        .report(task_id, &TaskStatusReport::progress(40, "installing"))
        .unwrap();
    fixture.dal.deployments().cancel(deployment.id).unwrap();
    age_heartbeat(&fixture, machine.id);

    assert!(run_maintenance(&fixture.dal) >= 1);

    let task = tasks.get(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.progress_percentage, 40);
    let history = fixture.dal.deployments().require(deployment.id).unwrap();
    assert_eq!(history.status, DeploymentStatus::Cancelled);
    assert_eq!(history.pending_count, 0);
    assert_eq!(history.failed_count, 1);
    assert!(history.counters_balance());

    // The agent comes back and works again.
    fixture
        .dal
        .machines()
        .heartbeat(&machine.machine_key, false, None)
        .unwrap();
    let next = fixture.deploy(&second, &[&machine], false);
    let next_task = fixture.dal.deployments().list_tasks(next.id).unwrap()[0].id;
    tasks.claim(next_task, &machine.machine_key).unwrap();
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_maintenance_retries_task_of_crashed_agent() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-REBOOTED");
    let deployment = fixture.deploy(&version, &[&machine], false);
    let task_id = fixture.dal.deployments().list_tasks(deployment.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();

    tasks.claim(task_id, &machine.machine_key).unwrap();
    age_heartbeat(&fixture, machine.id);
    run_maintenance(&fixture.dal);

    let task = tasks.get(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Retrying);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.failure_kind, Some(FailureKind::TransientNetwork));
    let history = fixture.dal.deployments().require(deployment.id).unwrap();
    assert_eq!(history.pending_count, 1);
    assert_eq!(history.status, DeploymentStatus::InProgress);
}

#[test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
fn test_maintenance_leaves_online_machines_alone() {
    let fixture = TestFixture::new();
    let app = fixture.insert_application();
    let version = fixture.insert_version(&app, "1.0.0");
    let machine = fixture.insert_machine("WS-HEALTHY");
    fixture
        .dal
        .machines()
        .heartbeat(&machine.machine_key, true, None)
        .unwrap();
    let deployment = fixture.deploy(&version, &[&machine], false);
    let task_id = fixture.dal.deployments().list_tasks(deployment.id).unwrap()[0].id;
    let tasks = fixture.dal.tasks();
    tasks.claim(task_id, &machine.machine_key).unwrap();

    run_maintenance(&fixture.dal);

    assert_eq!(tasks.get(task_id).unwrap().unwrap().status, TaskStatus::InProgress);
    assert!(fixture.dal.tasks().fail_abandoned().unwrap().is_empty());
}
