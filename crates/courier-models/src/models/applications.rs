/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// An application whose packages are distributed to client machines.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[diesel(table_name = crate::schema::applications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Application {
    pub id: i64,
    /// Short unique code; also the install directory name on clients.
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::applications)]
pub struct NewApplication {
    pub code: String,
    pub name: String,
}

impl NewApplication {
    /// Validates the code, which must be usable as a single path component.
    pub fn new(code: String, name: String) -> Result<Self, String> {
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err("Application code cannot be empty".to_string());
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            || code.starts_with('.')
        {
            return Err(format!(
                "Application code '{}' may only contain letters, digits, '-', '_' and '.'",
                code
            ));
        }
        let name = if name.trim().is_empty() {
            code.clone()
        } else {
            name
        };
        Ok(NewApplication { code, name })
    }
}
