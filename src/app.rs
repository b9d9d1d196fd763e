//! App data model.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A permission declared in an app's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sdk_version: Option<String>,
}

impl Permission {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_sdk_version: None,
        }
    }
}

/// An application package and everything extracted from it.
///
/// An App is built either from its identity (apps already archived under the
/// app directory) or from a raw package path (ad-hoc analysis). The unpack
/// directory is resolved lazily by [`crate::paths::PathResolver`] and then
/// kept for the lifetime of the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct App {
    pub db_id: Option<i64>,
    pub id: String,
    pub store: String,
    pub region: String,
    pub version: String,
    pub(crate) path: Option<PathBuf>,
    pub(crate) unpack_dir: Option<PathBuf>,
    pub permissions: Vec<Permission>,
    pub hosts: Vec<String>,
    pub packages: Vec<String>,
    pub icon: String,
    pub uses_reflection: bool,
}

impl App {
    pub fn new(
        id: impl Into<String>,
        store: impl Into<String>,
        region: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            store: store.into(),
            region: region.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Attach the database row id of a persisted app.
    pub fn with_db_id(mut self, db_id: i64) -> Self {
        self.db_id = Some(db_id);
        self
    }

    /// An app known only by the location of its package file.
    pub fn by_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Reattach an artifact directory resolved by an earlier run.
    pub fn with_unpack_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unpack_dir = Some(dir.into());
        self
    }

    /// Explicit package path, if the app was built from one.
    pub fn explicit_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Unpack directory, once it has been resolved.
    pub fn unpack_dir(&self) -> Option<&Path> {
        self.unpack_dir.as_deref()
    }

    /// Human-readable name for log lines.
    pub fn label(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => format!("{}/{}/{}/{}", self.id, self.store, self.region, self.version),
        }
    }
}
