//! SQLite connection management for the gateway database.
//!
//! One database file, two pools: a read-only pool sized for concurrent
//! history and token lookups, and a single read-write connection that
//! serializes every mutation (SQLite permits one writer at a time, so a
//! wider write pool would only relocate the contention). WAL journaling
//! keeps readers from stalling behind the writer, and the schema is
//! migrated on the writer before any reader opens.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// File name of the gateway database inside the data directory.
const DB_FILE: &str = "pumplink.db";

/// Upper bound on concurrent read connections.
const READER_CONNECTIONS: u32 = 8;

/// Paired read/write pools over the gateway database.
#[derive(Clone)]
pub struct DatabasePool {
    /// Read-only connections for SELECTs.
    pub reader: SqlitePool,
    /// The single read-write connection; all mutations go through here.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open the database at `{data_dir}/pumplink.db`, creating the file
    /// on first run and bringing the schema up to date.
    pub async fn open(data_dir: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(data_dir.join(DB_FILE))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        // The schema must exist before the read-only connections open.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}
