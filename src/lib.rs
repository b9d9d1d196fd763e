//! App artifact lifecycle and host-to-company mapping for the xray pipeline.
//!
//! Two jobs live here:
//!
//! - **Artifacts** - deterministic on-disk locations for archived APKs,
//!   unpacking them with `apktool` into a working directory, and removing
//!   that directory again.
//! - **Host mapping** - walking every app with recorded hostnames, asking the
//!   attribution service which company runs each host, and storing the
//!   result.
//!
//! # Architecture
//!
//! ```text
//! config ──► paths ──► artifact          (unpack / cleanup)
//!    │
//!    └─────► attribution ──► mapper ◄── store
//!               │
//!               └── geo (DNS + geoip)
//!
//! setops: dedup / union helpers shared by mapper and geo
//! ```
//!
//! Every component takes its configuration and a `tracing::Span` at
//! construction; nothing reads global state.

pub mod app;
pub mod artifact;
pub mod attribution;
pub mod config;
pub mod mapper;
pub mod paths;
pub mod preflight;
pub mod setops;
pub mod store;

#[cfg(test)]
mod testutil;

pub use app::{App, Permission};
pub use artifact::{ArtifactError, ArtifactManager, Disassembler};
pub use attribution::{AttributionClient, AttributionError, CompanyMapping, CompanyResolver};
pub use config::Config;
pub use mapper::{MappingOrchestrator, MappingReport};
pub use paths::PathResolver;
pub use store::{HostRecord, HostStore, InMemoryHostStore, SqliteHostStore};
