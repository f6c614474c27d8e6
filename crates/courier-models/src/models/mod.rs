/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

pub mod applications;
pub mod client_machines;
pub mod deployment_histories;
pub mod deployment_tasks;
pub mod failure;
pub mod manifests;
pub mod package_downloads;
pub mod package_versions;
