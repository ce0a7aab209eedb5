//! PostgreSQL session over `tokio-postgres`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use crate::connection::{Connection, SqlValue, Statement};
use crate::error::{MigrateResult, MigrationError};
use crate::model::MigrationRecord;

/// A single PostgreSQL session.
pub struct PgConnection {
    client: Mutex<Client>,
}

impl PgConnection {
    /// Connect with a libpq-style connection string.
    pub async fn connect(dsn: &str) -> MigrateResult<Self> {
        let (client, connection) = tokio_postgres::connect(dsn, NoTls)
            .await
            .map_err(|e| MigrationError::database(format!("Failed to connect: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

fn bind(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| match p {
            SqlValue::Text(s) => s as &(dyn ToSql + Sync),
            SqlValue::Bool(b) => b as &(dyn ToSql + Sync),
            SqlValue::Int(i) => i as &(dyn ToSql + Sync),
        })
        .collect()
}

fn db_error(e: tokio_postgres::Error) -> MigrationError {
    match e.as_db_error() {
        Some(db) => MigrationError::database(format!("{}: {}", db.code().code(), db.message())),
        None => MigrationError::database(e.to_string()),
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&self, stmt: &Statement) -> MigrateResult<u64> {
        debug!(sql = %stmt.sql, "Executing statement");
        let client = self.client.lock().await;
        if stmt.params.is_empty() {
            client.batch_execute(&stmt.sql).await.map_err(db_error)?;
            return Ok(0);
        }
        client
            .execute(stmt.sql.as_str(), &bind(&stmt.params))
            .await
            .map_err(db_error)
    }

    async fn query_scalar(&self, stmt: &Statement) -> MigrateResult<Option<i64>> {
        debug!(sql = %stmt.sql, "Executing scalar query");
        let client = self.client.lock().await;
        let row = client
            .query_opt(stmt.sql.as_str(), &bind(&stmt.params))
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => row.try_get::<_, Option<i64>>(0).map_err(db_error),
            None => Ok(None),
        }
    }

    async fn query_column(&self, stmt: &Statement) -> MigrateResult<Vec<String>> {
        debug!(sql = %stmt.sql, "Executing column query");
        let client = self.client.lock().await;
        let rows = client
            .query(stmt.sql.as_str(), &bind(&stmt.params))
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(db_error))
            .collect()
    }

    async fn query_records(&self, stmt: &Statement) -> MigrateResult<Vec<MigrationRecord>> {
        debug!(sql = %stmt.sql, "Reading ledger");
        let client = self.client.lock().await;
        let rows = client
            .query(stmt.sql.as_str(), &bind(&stmt.params))
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| {
                Ok(MigrationRecord {
                    id: row.try_get(0).map_err(db_error)?,
                    applied_at: row.try_get::<_, DateTime<Utc>>(1).map_err(db_error)?,
                    author: row.try_get(2).map_err(db_error)?,
                    labels: row.try_get(3).map_err(db_error)?,
                    kind: row.try_get(4).map_err(db_error)?,
                    transactional: row.try_get(5).map_err(db_error)?,
                })
            })
            .collect()
    }

    async fn run_script(
        &self,
        script: &str,
        bookkeeping: &Statement,
        transactional: bool,
    ) -> MigrateResult<()> {
        let mut client = self.client.lock().await;
        let params = bind(&bookkeeping.params);

        if transactional {
            let tx = client.transaction().await.map_err(db_error)?;
            tx.batch_execute(script).await.map_err(db_error)?;
            tx.execute(bookkeeping.sql.as_str(), &params)
                .await
                .map_err(db_error)?;
            tx.commit().await.map_err(db_error)?;
        } else {
            client.batch_execute(script).await.map_err(db_error)?;
            client
                .execute(bookkeeping.sql.as_str(), &params)
                .await
                .map_err(db_error)?;
        }
        debug!(sql = %bookkeeping.sql, transactional, "Script and bookkeeping committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_preserves_order() {
        let params = vec![SqlValue::from("a"), SqlValue::from(true), SqlValue::from(3_i64)];
        assert_eq!(bind(&params).len(), 3);
    }
}
