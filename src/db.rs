use crate::config::Config;
use crate::error::StoreError;
use crate::store::{KeyValueStore, StorageChange};
use anyhow::Result;
use futures_util::future::BoxFuture;
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use serde_json::Value;
use std::path::Path;
use tokio::sync::broadcast;

const SYSTEM_MIGRATIONS: &[(&str, &str)] = &[(
    "system/000_migrations_table.sql",
    include_str!("migrations/system/000_migrations_table.sql"),
)];

const MIGRATIONS: &[(&str, &str)] = &[("001_kv_store.sql", include_str!("migrations/001_kv_store.sql"))];

const CHANGE_CAPACITY: usize = 64;

/// libsql-backed key-value store. Values are JSON text.
pub struct Database {
    _db: LibsqlDatabase,
    conn: Connection,
    changes: broadcast::Sender<StorageChange>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) if e.to_string().contains("no such table") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join(cfg.app.get_db())).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(&conn, filename, sql).await?;
        }

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        tracing::info!(path = ?path, "[db] database ready");
        Ok(Database {
            _db: db,
            conn,
            changes,
        })
    }

    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_store WHERE key = ?", libsql::params![key])
            .await?;
        match rows.next().await? {
            Some(row) => {
                let text: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#;
        let text = serde_json::to_string(&value)?;
        self.conn.execute(query, libsql::params![key, text]).await?;
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value: Some(value),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM kv_store WHERE key = ?", libsql::params![key])
            .await?;
        if removed > 0 {
            let _ = self.changes.send(StorageChange {
                key: key.to_string(),
                new_value: None,
            });
        }
        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(self.read(key))
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write(key, value))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.delete(key))
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
