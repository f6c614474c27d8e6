/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for client machines.

use crate::dal::DAL;
use crate::rollout::ports::{MachineRegistry, Resolution};
use crate::rollout::RolloutError;
use crate::utils::event_bus::{self, RolloutEvent};
use chrono::Utc;
use courier_models::models::client_machines::{ClientMachine, MachineStatus, NewClientMachine};
use courier_models::schema::client_machines;
use courier_utils::logging::prelude::*;
use diesel::prelude::*;

/// Data Access Layer for ClientMachine operations.
pub struct MachinesDAL<'a> {
    pub dal: &'a DAL,
}

impl MachinesDAL<'_> {
    /// Registers a machine, or refreshes the stored identity of a known key.
    ///
    /// # Arguments
    ///
    /// * `new_machine` - Identity reported by the agent.
    ///
    /// # Returns
    ///
    /// The stored machine, online with a fresh heartbeat.
    pub fn register(&self, new_machine: &NewClientMachine) -> Result<ClientMachine, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let machine: ClientMachine = diesel::insert_into(client_machines::table)
            .values(new_machine)
            .on_conflict(client_machines::machine_key)
            .do_update()
            .set(new_machine)
            .get_result(conn)?;
        info!(
            "Machine '{}' registered as {} ({}@{})",
            machine.machine_key, machine.id, machine.user_name, machine.host_name
        );
        event_bus::emit(
            RolloutEvent::new(event_bus::MACHINE_REGISTERED)
                .machine(machine.id)
                .data(serde_json::json!({
                    "host_name": machine.host_name,
                    "user_name": machine.user_name,
                    "agent_version": machine.agent_version,
                })),
        );
        Ok(machine)
    }

    /// Records a heartbeat for `machine_key`.
    ///
    /// `installed_applications` replaces the stored snapshot when given.
    pub fn heartbeat(
        &self,
        machine_key: &str,
        busy: bool,
        installed_applications: Option<serde_json::Value>,
    ) -> Result<ClientMachine, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let status = if busy {
            MachineStatus::Busy
        } else {
            MachineStatus::Online
        };
        let target = client_machines::table.filter(client_machines::machine_key.eq(machine_key));
        let updated = match installed_applications {
            Some(apps) => diesel::update(target)
                .set((
                    client_machines::last_heartbeat.eq(Some(Utc::now())),
                    client_machines::status.eq(status),
                    client_machines::installed_applications.eq(apps),
                ))
                .get_result(conn)
                .optional()?,
            None => diesel::update(target)
                .set((
                    client_machines::last_heartbeat.eq(Some(Utc::now())),
                    client_machines::status.eq(status),
                ))
                .get_result(conn)
                .optional()?,
        };
        updated.ok_or_else(|| RolloutError::not_found(format!("machine '{}'", machine_key)))
    }

    pub fn get(&self, machine_id: i64) -> Result<Option<ClientMachine>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(client_machines::table
            .find(machine_id)
            .first(conn)
            .optional()?)
    }

    pub fn get_by_key(&self, machine_key: &str) -> Result<Option<ClientMachine>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(client_machines::table
            .filter(client_machines::machine_key.eq(machine_key))
            .first(conn)
            .optional()?)
    }

    pub fn require_by_key(&self, machine_key: &str) -> Result<ClientMachine, RolloutError> {
        self.get_by_key(machine_key)?
            .ok_or_else(|| RolloutError::not_found(format!("machine '{}'", machine_key)))
    }

    pub fn list(&self) -> Result<Vec<ClientMachine>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(client_machines::table
            .order(client_machines::id.asc())
            .load(conn)?)
    }

    /// Marks machines whose last heartbeat is older than the offline
    /// threshold as offline.
    ///
    /// # Returns
    ///
    /// The machines that changed status.
    pub fn mark_offline_stale(&self) -> Result<Vec<ClientMachine>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let cutoff = Utc::now() - self.dal.settings.offline_threshold;
        Ok(diesel::update(
            client_machines::table
                .filter(client_machines::status.ne(MachineStatus::Offline))
                .filter(
                    client_machines::last_heartbeat
                        .is_null()
                        .or(client_machines::last_heartbeat.lt(cutoff)),
                ),
        )
        .set(client_machines::status.eq(MachineStatus::Offline))
        .get_results(conn)?)
    }

    pub fn count_online(&self) -> Result<i64, RolloutError> {
        let conn = &mut self.dal.conn()?;
        let cutoff = Utc::now() - self.dal.settings.offline_threshold;
        Ok(client_machines::table
            .filter(client_machines::status.ne(MachineStatus::Offline))
            .filter(client_machines::last_heartbeat.ge(cutoff))
            .count()
            .get_result(conn)?)
    }
}

impl MachineRegistry for MachinesDAL<'_> {
    fn list_known_machines(&self) -> Result<Vec<i64>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(client_machines::table
            .select(client_machines::id)
            .order(client_machines::id.asc())
            .load(conn)?)
    }

    /// Identifiers match a machine key exactly, or a host or user name
    /// case-insensitively. One identifier may match several machines.
    fn resolve_machines(&self, identifiers: &[String]) -> Result<Resolution, RolloutError> {
        let machines = self.list()?;
        let mut resolution = Resolution::default();
        for identifier in identifiers {
            let mut matched = false;
            for machine in machines.iter().filter(|m| m.matches_identifier(identifier)) {
                matched = true;
                if !resolution.machine_ids.contains(&machine.id) {
                    resolution.machine_ids.push(machine.id);
                }
            }
            if !matched {
                resolution.unresolved.push(identifier.clone());
            }
        }
        Ok(resolution)
    }

    fn is_online(&self, machine_id: i64) -> Result<bool, RolloutError> {
        Ok(self
            .get(machine_id)?
            .is_some_and(|m| m.is_online_at(Utc::now(), self.dal.settings.offline_threshold)))
    }
}
