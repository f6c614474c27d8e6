/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::dal::{conflict_on_duplicate, DAL};
use crate::rollout::RolloutError;
use courier_models::models::applications::{Application, NewApplication};
use courier_models::schema::applications;
use diesel::prelude::*;

/// Data Access Layer for Application operations.
pub struct ApplicationsDAL<'a> {
    pub dal: &'a DAL,
}

impl ApplicationsDAL<'_> {
    pub fn create(&self, new_application: &NewApplication) -> Result<Application, RolloutError> {
        let conn = &mut self.dal.conn()?;
        diesel::insert_into(applications::table)
            .values(new_application)
            .get_result(conn)
            .map_err(|e| conflict_on_duplicate(e, &format!("application '{}'", new_application.code)))
    }

    pub fn get(&self, application_id: i64) -> Result<Option<Application>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(applications::table
            .find(application_id)
            .first(conn)
            .optional()?)
    }

    pub fn get_by_code(&self, code: &str) -> Result<Option<Application>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(applications::table
            .filter(applications::code.eq(code))
            .first(conn)
            .optional()?)
    }

    /// Like [`Self::get_by_code`] but a missing application is an error.
    pub fn require(&self, code: &str) -> Result<Application, RolloutError> {
        self.get_by_code(code)?
            .ok_or_else(|| RolloutError::not_found(format!("application '{}'", code)))
    }

    pub fn list(&self) -> Result<Vec<Application>, RolloutError> {
        let conn = &mut self.dal.conn()?;
        Ok(applications::table
            .order(applications::code.asc())
            .load(conn)?)
    }
}
