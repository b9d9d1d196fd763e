use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;

use super::{HostRecord, HostStore};
use crate::attribution::CompanyMapping;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS app_hosts (
    id INTEGER PRIMARY KEY,
    host_names TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    locale TEXT NOT NULL,
    categories TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS company_hosts (
    host_name TEXT PRIMARY KEY,
    host_id INTEGER NOT NULL,
    company_id INTEGER NOT NULL REFERENCES companies(id)
);

CREATE TABLE IF NOT EXISTS app_companies (
    app_id INTEGER NOT NULL,
    company_id INTEGER NOT NULL REFERENCES companies(id),
    PRIMARY KEY (app_id, company_id)
);
";

/// `HostStore` backed by a SQLite database file.
pub struct SqliteHostStore {
    conn: Connection,
}

impl SqliteHostStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory '{}'", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening database '{}'", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("enabling WAL journal")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("opening in-memory database")?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("applying database schema")?;
        Ok(Self { conn })
    }

    /// Record the hostnames seen for an app, replacing any previous list.
    pub fn insert_app_hosts(&self, id: i64, host_names: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(host_names)?;
        self.conn
            .execute(
                "INSERT INTO app_hosts (id, host_names) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET host_names = excluded.host_names",
                params![id, encoded],
            )
            .with_context(|| format!("storing host record for app {id}"))?;
        Ok(())
    }

    /// Company ids associated with an app, ascending.
    pub fn app_companies(&self, app_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT company_id FROM app_companies WHERE app_id = ?1 ORDER BY company_id")?;
        let ids = stmt
            .query_map(params![app_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn company_for_host(&self, host_name: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT company_id FROM company_hosts WHERE host_name = ?1",
                params![host_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

impl HostStore for SqliteHostStore {
    fn list_app_host_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM app_hosts ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("listing app host ids")?;
        Ok(ids)
    }

    fn get_app_hosts(&self, id: i64) -> Result<HostRecord> {
        let encoded: String = self
            .conn
            .query_row(
                "SELECT host_names FROM app_hosts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .with_context(|| format!("reading host record for app {id}"))?;
        let host_names = serde_json::from_str(&encoded)
            .with_context(|| format!("parsing host names for app {id}"))?;
        Ok(HostRecord { id, host_names })
    }

    fn upsert_company(&mut self, mapping: &CompanyMapping) -> Result<i64> {
        let categories = serde_json::to_string(&mapping.categories)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO companies (id, name, locale, categories) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO NOTHING",
            params![
                mapping.company_id,
                mapping.company_name,
                mapping.locale,
                categories
            ],
        )
        .with_context(|| format!("storing company {}", mapping.company_id))?;
        if !mapping.host_name.is_empty() {
            tx.execute(
                "INSERT INTO company_hosts (host_name, host_id, company_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(host_name) DO NOTHING",
                params![mapping.host_name, mapping.host_id, mapping.company_id],
            )
            .with_context(|| format!("storing host mapping for '{}'", mapping.host_name))?;
        }
        tx.commit()?;
        Ok(mapping.company_id)
    }

    fn upsert_association(&mut self, app_id: i64, company_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO app_companies (app_id, company_id) VALUES (?1, ?2)
                 ON CONFLICT(app_id, company_id) DO NOTHING",
                params![app_id, company_id],
            )
            .with_context(|| format!("associating app {app_id} with company {company_id}"))?;
        Ok(())
    }
}
