/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

mod applications;
mod deployments;
mod machines;
mod manifests;
mod packages;
mod tasks;

use crate::api::AppState;
use axum::Router;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(applications::routes())
        .merge(packages::routes())
        .merge(manifests::routes())
        .merge(machines::routes())
        .merge(tasks::routes())
        .merge(deployments::routes())
}
