/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::MachineStatus"]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Online,
    Offline,
    Busy,
}

/// A registered client endpoint. Machines are never hard-deleted.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[diesel(table_name = crate::schema::client_machines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ClientMachine {
    pub id: i64,
    /// Stable hash of host, user and MAC; unique across re-registrations.
    pub machine_key: String,
    pub host_name: String,
    pub user_name: String,
    pub mac_address: String,
    pub ip_address: Option<String>,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub status: MachineStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Last reported snapshot of installed applications.
    pub installed_applications: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientMachine {
    /// True when the machine is not flagged offline and its last heartbeat is
    /// within `threshold` of `now`.
    pub fn is_online_at(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.status != MachineStatus::Offline
            && self
                .last_heartbeat
                .map(|hb| now - hb <= threshold)
                .unwrap_or(false)
    }

    /// Whether an operator-supplied identifier names this machine.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        self.machine_key == identifier
            || self.host_name.eq_ignore_ascii_case(identifier)
            || self.user_name.eq_ignore_ascii_case(identifier)
    }
}

/// Registration payload, upserted by `machine_key`.
#[derive(Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::client_machines)]
pub struct NewClientMachine {
    pub machine_key: String,
    pub host_name: String,
    pub user_name: String,
    pub mac_address: String,
    pub ip_address: Option<String>,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub status: MachineStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub installed_applications: serde_json::Value,
}

impl NewClientMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine_key: String,
        host_name: String,
        user_name: String,
        mac_address: String,
        ip_address: Option<String>,
        os_version: Option<String>,
        agent_version: Option<String>,
        installed_applications: serde_json::Value,
    ) -> Result<Self, String> {
        if machine_key.trim().is_empty() {
            return Err("Machine key cannot be empty".to_string());
        }
        if host_name.trim().is_empty() {
            return Err("Host name cannot be empty".to_string());
        }
        if !installed_applications.is_array() {
            return Err("Installed applications must be a JSON array".to_string());
        }
        Ok(NewClientMachine {
            machine_key: machine_key.trim().to_string(),
            host_name,
            user_name,
            mac_address,
            ip_address,
            os_version,
            agent_version,
            status: MachineStatus::Online,
            last_heartbeat: Some(Utc::now()),
            installed_applications,
        })
    }
}
