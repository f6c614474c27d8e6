/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! In-memory fixtures for exercising the rollout rules without a database.

use chrono::{Duration, Utc};
use courier_models::models::client_machines::{ClientMachine, MachineStatus};
use courier_models::models::deployment_histories::{
    DeploymentHistory, DeploymentStatus, DeploymentType, NewDeploymentHistory,
};
use courier_models::models::deployment_tasks::{DeploymentTask, TaskStatus};
use courier_models::models::manifests::ApplicationManifest;
use courier_models::models::package_versions::PackageVersion;
use std::sync::Mutex;

use super::error::RolloutError;
use super::ports::{MachineRegistry, ManifestResolver, PackageStore, Resolution};

pub fn task(id: i64, machine_id: i64, priority: i32) -> DeploymentTask {
    let created_at = Utc::now() - Duration::seconds(60) + Duration::milliseconds(id);
    DeploymentTask {
        id,
        deployment_id: 1,
        machine_id,
        package_version_id: 20,
        status: TaskStatus::Queued,
        priority,
        progress_percentage: 0,
        current_step: None,
        retry_count: 0,
        max_retries: 3,
        next_retry_at: None,
        scheduled_for: None,
        error_message: None,
        failure_kind: None,
        download_size_bytes: None,
        created_at,
        started_at: None,
        completed_at: None,
        updated_at: created_at,
    }
}

pub fn deployment(id: i64, total: i32, status: DeploymentStatus) -> DeploymentHistory {
    let ids: Vec<i64> = (1..=total as i64).collect();
    DeploymentHistory {
        id,
        package_version_id: 20,
        application_id: 1,
        environment: "production".into(),
        deployment_type: DeploymentType::Release,
        is_global: true,
        requested_targets: serde_json::json!([]),
        planned_machine_ids: serde_json::json!(ids),
        skipped_targets: serde_json::json!([]),
        total_targets: total,
        success_count: 0,
        failed_count: 0,
        pending_count: total,
        status,
        requires_approval: false,
        approved_by: None,
        approved_at: None,
        initiated_by: "ops".into(),
        priority: 0,
        scheduled_for: None,
        max_retries: 3,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        updated_at: Utc::now(),
    }
}

/// What the database would return after inserting `new`.
pub fn persisted(id: i64, new: &NewDeploymentHistory) -> DeploymentHistory {
    DeploymentHistory {
        id,
        package_version_id: new.package_version_id,
        application_id: new.application_id,
        environment: new.environment.clone(),
        deployment_type: new.deployment_type,
        is_global: new.is_global,
        requested_targets: new.requested_targets.clone(),
        planned_machine_ids: new.planned_machine_ids.clone(),
        skipped_targets: new.skipped_targets.clone(),
        total_targets: new.total_targets,
        success_count: new.success_count,
        failed_count: new.failed_count,
        pending_count: new.pending_count,
        status: new.status,
        requires_approval: new.requires_approval,
        approved_by: None,
        approved_at: None,
        initiated_by: new.initiated_by.clone(),
        priority: new.priority,
        scheduled_for: new.scheduled_for,
        max_retries: new.max_retries,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub versions: Vec<PackageVersion>,
    pub machines: Vec<ClientMachine>,
    pub manifests: Vec<ApplicationManifest>,
    pub downloads: Mutex<Vec<(i64, i64, i64, bool)>>,
}

impl MemoryStore {
    pub fn add_version(&mut self, id: i64, version: &str, replaces: Option<i64>, active: bool) {
        self.versions.push(PackageVersion {
            id,
            application_id: 1,
            version: version.to_string(),
            content_hash: format!("{:064x}", id),
            size_bytes: 1024,
            storage_path: format!("app/{}.bundle", version),
            is_stable: !version.contains('-'),
            replaces_version_id: replaces,
            release_notes: None,
            is_active: active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    }

    pub fn add_machine(&mut self, id: i64, key: &str, host: &str, user: &str) {
        self.machines.push(ClientMachine {
            id,
            machine_key: key.to_string(),
            host_name: host.to_string(),
            user_name: user.to_string(),
            mac_address: format!("00:00:00:00:00:{:02x}", id),
            ip_address: None,
            os_version: None,
            agent_version: None,
            status: MachineStatus::Online,
            last_heartbeat: Some(Utc::now()),
            installed_applications: serde_json::json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    }
}

impl PackageStore for MemoryStore {
    fn get_version(
        &self,
        application_id: i64,
        version: &str,
    ) -> Result<Option<PackageVersion>, RolloutError> {
        Ok(self
            .versions
            .iter()
            .find(|v| v.application_id == application_id && v.version == version)
            .cloned())
    }

    fn get_version_by_id(&self, version_id: i64) -> Result<Option<PackageVersion>, RolloutError> {
        Ok(self.versions.iter().find(|v| v.id == version_id).cloned())
    }

    fn get_latest(
        &self,
        application_id: i64,
        stable_only: bool,
    ) -> Result<Option<PackageVersion>, RolloutError> {
        Ok(PackageVersion::latest(
            self.versions
                .iter()
                .filter(|v| v.application_id == application_id),
            stable_only,
        )
        .cloned())
    }

    fn record_download(
        &self,
        version_id: i64,
        machine_id: i64,
        bytes: i64,
        success: bool,
    ) -> Result<(), RolloutError> {
        self.downloads
            .lock()
            .map_err(|_| RolloutError::conflict("download log poisoned"))?
            .push((version_id, machine_id, bytes, success));
        Ok(())
    }
}

impl MachineRegistry for MemoryStore {
    fn list_known_machines(&self) -> Result<Vec<i64>, RolloutError> {
        Ok(self.machines.iter().map(|m| m.id).collect())
    }

    fn resolve_machines(&self, identifiers: &[String]) -> Result<Resolution, RolloutError> {
        let mut resolution = Resolution::default();
        for identifier in identifiers {
            let matches: Vec<i64> = self
                .machines
                .iter()
                .filter(|m| m.matches_identifier(identifier))
                .map(|m| m.id)
                .collect();
            if matches.is_empty() {
                resolution.unresolved.push(identifier.clone());
            }
            for id in matches {
                if !resolution.machine_ids.contains(&id) {
                    resolution.machine_ids.push(id);
                }
            }
        }
        Ok(resolution)
    }

    fn is_online(&self, machine_id: i64) -> Result<bool, RolloutError> {
        Ok(self
            .machines
            .iter()
            .any(|m| m.id == machine_id && m.is_online_at(Utc::now(), Duration::seconds(120))))
    }
}

impl ManifestResolver for MemoryStore {
    fn get_active_manifest(
        &self,
        application_id: i64,
    ) -> Result<Option<ApplicationManifest>, RolloutError> {
        Ok(self
            .manifests
            .iter()
            .find(|m| m.application_id == application_id && m.is_active)
            .cloned())
    }
}

#[test]
fn memory_store_resolves_like_the_registry_contract() {
    let mut s = MemoryStore::default();
    s.add_machine(1, "k1", "WS-1", "alice");
    s.add_machine(2, "k2", "WS-2", "alice");
    s.add_version(10, "1.0.0", None, true);
    s.add_version(11, "1.2.0", Some(10), true);

    let r = s
        .resolve_machines(&["ALICE".to_string(), "nobody".to_string()])
        .unwrap();
    assert_eq!(r.machine_ids, vec![1, 2]);
    assert_eq!(r.unresolved, vec!["nobody".to_string()]);
    assert!(s.is_online(1).unwrap());
    assert_eq!(s.get_latest(1, true).unwrap().unwrap().id, 11);
    assert_eq!(s.get_version(1, "1.0.0").unwrap().unwrap().id, 10);
    assert!(s.get_active_manifest(1).unwrap().is_none());
    s.record_download(11, 1, 1024, true).unwrap();
    assert_eq!(s.downloads.lock().unwrap().len(), 1);
}
