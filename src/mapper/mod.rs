//! Host-to-company mapping pass.
//!
//! For every app with recorded hostnames, look each distinct hostname up with
//! the attribution service and write the resulting company and app/company
//! association to the store. Failures for a single host or app are logged and
//! counted; the pass always covers every app the store lists.

use anyhow::{Context, Result};
use tracing::Span;

use crate::attribution::CompanyResolver;
use crate::setops;
use crate::store::{HostRecord, HostStore};

/// Counters for one mapping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingReport {
    pub apps_seen: usize,
    pub app_failures: usize,
    pub hosts_attempted: usize,
    pub hosts_mapped: usize,
    pub host_failures: usize,
}

pub struct MappingOrchestrator<'a, S, C> {
    store: &'a mut S,
    resolver: &'a C,
    span: Span,
}

impl<'a, S: HostStore, C: CompanyResolver> MappingOrchestrator<'a, S, C> {
    pub fn new(store: &'a mut S, resolver: &'a C, span: Span) -> Self {
        Self {
            store,
            resolver,
            span,
        }
    }

    /// Run a full pass. Only failing to list the apps is an error.
    pub fn run(&mut self) -> Result<MappingReport> {
        let span = self.span.clone();
        let _enter = span.enter();

        let ids = self
            .store
            .list_app_host_ids()
            .context("listing apps with host records")?;
        tracing::info!(apps = ids.len(), "starting host mapping pass");

        let mut report = MappingReport::default();
        for id in ids {
            report.apps_seen += 1;
            let record = match self.store.get_app_hosts(id) {
                Ok(record) => record,
                Err(err) => {
                    report.app_failures += 1;
                    tracing::error!(app_id = id, error = %format!("{err:#}"), "couldn't read host record");
                    continue;
                }
            };
            self.map_record(record, &mut report);
        }

        tracing::info!(
            apps = report.apps_seen,
            app_failures = report.app_failures,
            hosts = report.hosts_attempted,
            mapped = report.hosts_mapped,
            host_failures = report.host_failures,
            "host mapping pass finished"
        );
        Ok(report)
    }

    fn map_record(&mut self, record: HostRecord, report: &mut MappingReport) {
        let HostRecord { id, mut host_names } = record;
        host_names.retain(|host| !host.trim().is_empty());
        setops::dedup(&mut host_names);

        for host in host_names {
            report.hosts_attempted += 1;
            let mapping = match self.resolver.map_hosts(std::slice::from_ref(&host)) {
                Ok(mapping) => mapping,
                Err(err) => {
                    report.host_failures += 1;
                    tracing::error!(app_id = id, host = %host, kind = err.kind(), error = %err, "couldn't map host");
                    continue;
                }
            };
            tracing::debug!(
                app_id = id,
                host = %host,
                company = %mapping.company_name,
                "mapped host to company"
            );

            let stored = self
                .store
                .upsert_company(&mapping)
                .and_then(|company_id| self.store.upsert_association(id, company_id));
            match stored {
                Ok(()) => report.hosts_mapped += 1,
                Err(err) => {
                    report.host_failures += 1;
                    tracing::error!(app_id = id, host = %host, kind = "storage", error = %format!("{err:#}"), "couldn't store mapping");
                }
            }
        }
    }
}
