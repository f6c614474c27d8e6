/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Machine Identity
//!
//! A machine is known to the broker by a key that survives re-registration:
//! the SHA-256 of its lower-cased host name, user name and MAC address. The
//! `agent.machine_key` setting replaces the computed key when present.

use courier_models::models::package_versions::sha256_hex;
use courier_models::wire::{InstalledApplication, RegisterMachineRequest};
use sysinfo::{Networks, System};

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub machine_key: String,
    pub host_name: String,
    pub user_name: String,
    pub mac_address: String,
    pub ip_address: Option<String>,
    pub os_version: Option<String>,
}

impl MachineIdentity {
    /// Reads host, user and network details from the running system.
    pub fn detect(key_override: Option<&str>) -> Self {
        let host_name = System::host_name().unwrap_or_else(|| UNKNOWN.to_string());
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| UNKNOWN.to_string());
        let (mac_address, ip_address) = primary_interface();
        Self::new(
            host_name,
            user_name,
            mac_address,
            ip_address,
            System::long_os_version(),
            key_override,
        )
    }

    pub fn new(
        host_name: String,
        user_name: String,
        mac_address: String,
        ip_address: Option<String>,
        os_version: Option<String>,
        key_override: Option<&str>,
    ) -> Self {
        let machine_key = match key_override.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => compute_machine_key(&host_name, &user_name, &mac_address),
        };
        MachineIdentity {
            machine_key,
            host_name,
            user_name,
            mac_address,
            ip_address,
            os_version,
        }
    }

    pub fn register_request(
        &self,
        installed_applications: Vec<InstalledApplication>,
    ) -> RegisterMachineRequest {
        RegisterMachineRequest {
            machine_key: self.machine_key.clone(),
            host_name: self.host_name.clone(),
            user_name: self.user_name.clone(),
            mac_address: self.mac_address.clone(),
            ip_address: self.ip_address.clone(),
            os_version: self.os_version.clone(),
            agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            installed_applications,
        }
    }
}

pub fn compute_machine_key(host_name: &str, user_name: &str, mac_address: &str) -> String {
    let material = format!(
        "{}|{}|{}",
        host_name.trim().to_lowercase(),
        user_name.trim().to_lowercase(),
        mac_address.trim().to_lowercase()
    );
    sha256_hex(material.as_bytes())
}

/// MAC and first non-loopback address of the lexically first interface with a
/// hardware address.
fn primary_interface() -> (String, Option<String>) {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<_> = networks
        .iter()
        .filter(|(_, data)| !data.mac_address().is_unspecified())
        .collect();
    interfaces.sort_by(|a, b| a.0.cmp(b.0));

    match interfaces.first() {
        Some((_, data)) => {
            let ip = data
                .ip_networks()
                .iter()
                .map(|network| network.addr)
                .find(|addr| !addr.is_loopback())
                .map(|addr| addr.to_string());
            (data.mac_address().to_string(), ip)
        }
        None => ("00:00:00:00:00:00".to_string(), None),
    }
}
