//! Storage collaborator for app hosts and company associations.
//!
//! The pipeline only needs four operations, captured by [`HostStore`]. Both
//! upserts must be safe to repeat with identical input.

mod memory;
mod sqlite;

pub use memory::InMemoryHostStore;
pub use sqlite::SqliteHostStore;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::attribution::CompanyMapping;

/// Hostnames recorded for one app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: i64,
    #[serde(rename = "hostnames")]
    pub host_names: Vec<String>,
}

pub trait HostStore {
    /// Ids of every app that has a host record.
    fn list_app_host_ids(&self) -> Result<Vec<i64>>;

    fn get_app_hosts(&self, id: i64) -> Result<HostRecord>;

    /// Insert the company and its host mapping if new, returning the
    /// company id.
    fn upsert_company(&mut self, mapping: &CompanyMapping) -> Result<i64>;

    /// Associate an app with a company if not already associated.
    fn upsert_association(&mut self, app_id: i64, company_id: i64) -> Result<()>;
}
