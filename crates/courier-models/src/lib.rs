/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Persistent and wire models shared by the courier broker and agent.

pub mod models;
pub mod schema;
pub mod wire;
