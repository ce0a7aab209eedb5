//! Database drivers implementing [`Connection`].

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;

use tracing::info;

use crate::config::DatabaseConfig;
use crate::connection::Connection;
use crate::error::{MigrateResult, MigrationError};
use crate::store::SqlTrackingStore;

/// Open one session for the configured driver.
pub async fn connect(config: &DatabaseConfig) -> MigrateResult<Box<dyn Connection>> {
    let conn: Box<dyn Connection> = match config.driver {
        #[cfg(feature = "postgres")]
        crate::dialect::Driver::Postgres => {
            Box::new(postgres::PgConnection::connect(&config.postgres_dsn()).await?)
        }
        #[cfg(feature = "mysql")]
        crate::dialect::Driver::MySql => {
            Box::new(mysql::MysqlConnection::connect(&config.mysql_url()?).await?)
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(MigrationError::UnsupportedDriver(format!(
                "{} (driver not compiled in)",
                other
            )));
        }
    };

    info!(
        driver = %config.driver,
        host = %config.host,
        port = config.port,
        database = %config.database,
        "Connected"
    );
    Ok(conn)
}

/// Connect and wrap the session in a tracking store for the configured ledger table.
pub async fn open_store(config: &DatabaseConfig) -> MigrateResult<SqlTrackingStore> {
    let conn = connect(config).await?;
    Ok(SqlTrackingStore::new(conn, config.dialect(), config.table()))
}
