//! PostgreSQL store on diesel-async.
//!
//! Each trait method checks a connection out of the pool and, when it writes
//! more than one row, runs inside a single transaction. Cart rows are locked
//! with `FOR UPDATE` before their lines change so totals are recomputed
//! against a stable set of lines.

mod accounts;
mod carts;
mod catalog;
mod orders;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{AsyncPgConnection, pooled_connection::bb8::PooledConnection};

use crate::{app::db::DbPool, carts::CartError};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")
    }
}

impl From<DieselError> for CartError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => CartError::NotFound("Record"),
            // A row we depended on changed or vanished under us: the caller
            // re-resolves and tries again.
            DieselError::DatabaseError(
                DatabaseErrorKind::SerializationFailure
                | DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation,
                _,
            ) => CartError::Conflict,
            other => CartError::Store(other.into()),
        }
    }
}
