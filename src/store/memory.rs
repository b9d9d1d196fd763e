use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};

use super::{HostRecord, HostStore};
use crate::attribution::CompanyMapping;

/// Map-backed store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHostStore {
    hosts: BTreeMap<i64, Vec<String>>,
    companies: BTreeMap<i64, CompanyMapping>,
    host_companies: BTreeMap<String, i64>,
    associations: BTreeSet<(i64, i64)>,
}

impl InMemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_app_hosts<I, S>(&mut self, id: i64, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts
            .insert(id, hosts.into_iter().map(Into::into).collect());
    }

    pub fn company(&self, id: i64) -> Option<&CompanyMapping> {
        self.companies.get(&id)
    }

    pub fn company_count(&self) -> usize {
        self.companies.len()
    }

    pub fn company_for_host(&self, host: &str) -> Option<i64> {
        self.host_companies.get(host).copied()
    }

    pub fn associations(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.associations.iter().copied()
    }
}

impl HostStore for InMemoryHostStore {
    fn list_app_host_ids(&self) -> Result<Vec<i64>> {
        Ok(self.hosts.keys().copied().collect())
    }

    fn get_app_hosts(&self, id: i64) -> Result<HostRecord> {
        let host_names = self
            .hosts
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no host record for app {}", id))?;
        Ok(HostRecord { id, host_names })
    }

    fn upsert_company(&mut self, mapping: &CompanyMapping) -> Result<i64> {
        self.companies
            .entry(mapping.company_id)
            .or_insert_with(|| mapping.clone());
        if !mapping.host_name.is_empty() {
            self.host_companies
                .entry(mapping.host_name.clone())
                .or_insert(mapping.company_id);
        }
        Ok(mapping.company_id)
    }

    fn upsert_association(&mut self, app_id: i64, company_id: i64) -> Result<()> {
        self.associations.insert((app_id, company_id));
        Ok(())
    }
}
