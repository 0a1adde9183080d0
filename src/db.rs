use std::{str::FromStr, time::Duration};

use migration::{Migrator, MigratorTrait};
use sea_orm::{
    DatabaseConnection, SqlxSqliteConnector,
    sqlx::{
        ConnectOptions as _,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    },
};

use crate::error::{AppError, AppResult};

/// Opens the pool and runs migrations. Pragmas are part of the connect
/// options, so every pooled connection gets them.
pub async fn connect_and_migrate(database_url: &str) -> AppResult<DatabaseConnection> {
    let opts = SqliteConnectOptions::from_str(database_url)
        .map_err(sqlx_error)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .pragma("cache_size", "-64000")
        .disable_statement_logging();

    let mut pool = SqlitePoolOptions::new();
    // An in-memory database lives only as long as its single connection.
    if database_url.contains(":memory:") {
        pool = pool
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);
    }

    let pool = pool.connect_with(opts).await.map_err(sqlx_error)?;
    let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);

    Migrator::up(&db, None).await?;
    Ok(db)
}

fn sqlx_error(err: sea_orm::sqlx::Error) -> AppError {
    AppError::Internal(anyhow::Error::new(err))
}

#[cfg(test)]
mod tests {
    use sea_orm::{ConnectionTrait, Statement};

    use super::*;

    async fn pragma(db: &DatabaseConnection, name: &str) -> i64 {
        let stmt = Statement::from_string(db.get_database_backend(), format!("PRAGMA {name}"));
        db.query_one(stmt).await.unwrap().unwrap().try_get_by_index::<i64>(0).unwrap()
    }

    #[tokio::test]
    async fn every_pooled_connection_gets_the_pragmas() {
        let path = std::env::temp_dir()
            .join(format!("whatsplaying-pragmas-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let db = connect_and_migrate(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();

        let checks = futures::future::join_all((0..6).map(|_| async {
            (pragma(&db, "foreign_keys").await, pragma(&db, "synchronous").await)
        }))
        .await;
        // synchronous=NORMAL reads back as 1.
        assert!(checks.iter().all(|&(fk, sync)| fk == 1 && sync == 1), "{checks:?}");
        assert_eq!(pragma(&db, "cache_size").await, -64000);

        db.close().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn memory_databases_enforce_foreign_keys() {
        let db = connect_and_migrate("sqlite::memory:").await.unwrap();
        let orphan = Statement::from_string(
            db.get_database_backend(),
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES ('t', 999, 0, 1)",
        );
        assert!(db.execute(orphan).await.is_err());
    }
}
