#[cfg(not(any(feature = "db-mysql", feature = "db-sqlite")))]
compile_error!("Either the `db-mysql` or `db-sqlite` feature must be enabled.");

#[cfg(all(feature = "db-mysql", feature = "db-sqlite"))]
compile_error!("Only one of `db-mysql` or `db-sqlite` can be enabled.");

#[cfg(feature = "db-mysql")]
pub use sqlx::mysql::{
    MySql as Db, MySqlConnectOptions as DbConnectOptions, MySqlPool as DbPool,
    MySqlPoolOptions as DbPoolOptions, MySqlQueryResult as DbQueryResult,
};

#[cfg(feature = "db-sqlite")]
pub use sqlx::sqlite::{
    Sqlite as Db, SqliteConnectOptions as DbConnectOptions, SqlitePool as DbPool,
    SqlitePoolOptions as DbPoolOptions, SqliteQueryResult as DbQueryResult,
};

use sqlx::migrate::Migrator;

use crate::config::DatabaseSettings;

#[cfg(feature = "db-mysql")]
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations/mysql");

#[cfg(feature = "db-sqlite")]
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");

const MAX_CONNECTIONS: u32 = 5;

/// Connection options for the configured server.
#[cfg(feature = "db-mysql")]
pub fn connect_options(settings: &DatabaseSettings) -> DbConnectOptions {
    DbConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(settings.password.expose())
        .database(&settings.name)
}

/// With SQLite the database name is the file path; host and port are unused.
#[cfg(feature = "db-sqlite")]
pub fn connect_options(settings: &DatabaseSettings) -> DbConnectOptions {
    DbConnectOptions::new()
        .filename(&settings.name)
        .create_if_missing(true)
        .foreign_keys(true)
}

/// Opens the pool. On MySQL every fresh connection runs the configured init
/// command, which puts the session into strict SQL mode.
pub async fn connect(settings: &DatabaseSettings) -> Result<DbPool, sqlx::Error> {
    tracing::info!(
        "Connecting to database {} at {}:{} as {}",
        settings.name,
        settings.host,
        settings.port,
        settings.user
    );

    let options = DbPoolOptions::new().max_connections(MAX_CONNECTIONS);

    #[cfg(feature = "db-mysql")]
    let options = {
        let init_command = settings.init_command.clone();
        options.after_connect(move |conn, _meta| {
            let init_command = init_command.clone();
            Box::pin(async move {
                use sqlx::Executor;
                conn.execute(init_command.as_str()).await?;
                Ok(())
            })
        })
    };

    options.connect_with(connect_options(settings)).await
}

/// Id of the row created by an `INSERT`.
#[cfg(feature = "db-mysql")]
pub fn last_insert_id(result: &DbQueryResult) -> i64 {
    result.last_insert_id() as i64
}

#[cfg(feature = "db-sqlite")]
pub fn last_insert_id(result: &DbQueryResult) -> i64 {
    result.last_insert_rowid()
}

/// True when the error comes from a UNIQUE constraint.
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
        _ => false,
    }
}
