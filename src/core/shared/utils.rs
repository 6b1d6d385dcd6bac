use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;
use std::time::Duration;

use crate::core::config::DatabaseConfig;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Per-connection SQLite pragmas applied when the pool opens a connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        );
        if self.wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        }
        conn.batch_execute(&pragmas)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn create_conn(config: &DatabaseConfig) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<SqliteConnection>::new(config.url.as_str());
    let in_memory = config.url.contains(":memory:");
    let mut builder = Pool::builder()
        .max_size(config.max_connections.max(1))
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            wal: !in_memory,
        }));
    if in_memory {
        // every in-memory connection is its own database, so keep exactly one alive
        builder = builder.max_size(1).idle_timeout(None).max_lifetime(None);
    }
    builder.build(manager)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut conn = pool.get()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    if !applied.is_empty() {
        info!("Applied {} database migration(s)", applied.len());
    }
    Ok(())
}

/// Cuts `text` to at most `max_chars` characters, appending `...` when something was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
