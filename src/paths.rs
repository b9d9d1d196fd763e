//! Canonical on-disk locations for app packages and their unpacked trees.
//!
//! Archived apps live at `app_root/<id>/<store>/<region>/<version>/<id>.apk`
//! and unpack to `unpack_root/<id>/<store>/<region>/<version>`. Apps built
//! from an explicit package path unpack into a fresh temporary directory
//! under `unpack_root` instead.

use std::fs;
use std::path::{Path, PathBuf};

use crate::app::App;
use crate::artifact::ArtifactError;
use crate::config::Config;

pub const PACKAGE_EXTENSION: &str = "apk";

#[derive(Debug, Clone)]
pub struct PathResolver {
    app_root: PathBuf,
    unpack_root: PathBuf,
}

impl PathResolver {
    pub fn new(app_root: impl Into<PathBuf>, unpack_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            unpack_root: unpack_root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.app_dir, &config.unpack_dir)
    }

    pub fn unpack_root(&self) -> &Path {
        &self.unpack_root
    }

    /// Directory holding the package and other per-app files.
    pub fn app_dir(&self, app: &App) -> PathBuf {
        match app.explicit_path() {
            Some(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            None => identity_path(&self.app_root, app),
        }
    }

    pub fn package_path(&self, app: &App) -> PathBuf {
        match app.explicit_path() {
            Some(path) => path.to_path_buf(),
            None => self
                .app_dir(app)
                .join(format!("{}.{}", app.id, PACKAGE_EXTENSION)),
        }
    }

    /// Resolve the unpack directory, creating it on first use and recording it
    /// on the app so later calls return the same location.
    pub fn artifact_dir(&self, app: &mut App) -> Result<PathBuf, ArtifactError> {
        if let Some(dir) = app.unpack_dir() {
            return Ok(dir.to_path_buf());
        }

        let dir = match app.explicit_path() {
            Some(path) => {
                let prefix = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "app".to_string());
                fs::create_dir_all(&self.unpack_root)
                    .map_err(|source| ArtifactError::filesystem(&self.unpack_root, source))?;
                tempfile::Builder::new()
                    .prefix(&prefix)
                    .tempdir_in(&self.unpack_root)
                    .map_err(|source| ArtifactError::filesystem(&self.unpack_root, source))?
                    .keep()
            }
            None => {
                let dir = identity_path(&self.unpack_root, app);
                fs::create_dir_all(&dir).map_err(|source| ArtifactError::filesystem(&dir, source))?;
                dir
            }
        };

        tracing::debug!(app = %app.label(), dir = %dir.display(), "resolved artifact directory");
        app.unpack_dir = Some(dir.clone());
        Ok(dir)
    }

    /// The artifact directory without touching the filesystem.
    ///
    /// `None` for an explicit-path app whose temporary directory was never
    /// allocated.
    pub fn planned_artifact_dir(&self, app: &App) -> Option<PathBuf> {
        if let Some(dir) = app.unpack_dir() {
            return Some(dir.to_path_buf());
        }
        match app.explicit_path() {
            Some(_) => None,
            None => Some(identity_path(&self.unpack_root, app)),
        }
    }
}

fn identity_path(root: &Path, app: &App) -> PathBuf {
    root.join(&app.id)
        .join(&app.store)
        .join(&app.region)
        .join(&app.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(temp: &TempDir) -> PathResolver {
        PathResolver::new(temp.path().join("apps"), temp.path().join("unpacked"))
    }

    #[test]
    fn package_path_from_identity() {
        let temp = TempDir::new().unwrap();
        let paths = resolver(&temp);
        let app = App::new("com.example", "play", "us", "1.2.3");

        assert_eq!(
            paths.package_path(&app),
            temp.path()
                .join("apps/com.example/play/us/1.2.3/com.example.apk")
        );
        assert_eq!(
            paths.app_dir(&app),
            temp.path().join("apps/com.example/play/us/1.2.3")
        );
    }

    #[test]
    fn explicit_path_is_returned_unchanged() {
        let temp = TempDir::new().unwrap();
        let paths = resolver(&temp);
        let app = App::by_path("/downloads/thing.apk");

        assert_eq!(paths.package_path(&app), PathBuf::from("/downloads/thing.apk"));
        assert_eq!(paths.app_dir(&app), PathBuf::from("/downloads"));
    }

    #[test]
    fn identity_paths_are_deterministic() {
        let temp = TempDir::new().unwrap();
        let paths = resolver(&temp);
        let mut first = App::new("com.example", "play", "gb", "4");
        let mut second = App::new("com.example", "play", "gb", "4");

        assert_eq!(paths.package_path(&first), paths.package_path(&second));
        let a = paths.artifact_dir(&mut first).unwrap();
        let b = paths.artifact_dir(&mut second).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, temp.path().join("unpacked/com.example/play/gb/4"));
        assert!(a.is_dir());
    }

    #[test]
    fn explicit_path_gets_unique_temp_dir_once() {
        let temp = TempDir::new().unwrap();
        let paths = resolver(&temp);
        let mut first = App::by_path(temp.path().join("local.apk"));
        let mut second = App::by_path(temp.path().join("local.apk"));

        let dir = paths.artifact_dir(&mut first).unwrap();
        assert!(dir.is_dir());
        assert!(dir.starts_with(temp.path().join("unpacked")));
        assert!(dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("local.apk"));

        // Recorded on the app, never recomputed.
        assert_eq!(paths.artifact_dir(&mut first).unwrap(), dir);
        assert_eq!(first.unpack_dir(), Some(dir.as_path()));

        let other = paths.artifact_dir(&mut second).unwrap();
        assert_ne!(dir, other);
    }

    #[test]
    fn planned_dir_does_not_touch_disk() {
        let temp = TempDir::new().unwrap();
        let paths = resolver(&temp);
        let app = App::new("a", "b", "c", "d");
        let planned = paths.planned_artifact_dir(&app).unwrap();
        assert!(!planned.exists());

        let by_path = App::by_path("/x/y.apk");
        assert!(paths.planned_artifact_dir(&by_path).is_none());
    }

    #[test]
    fn artifact_dir_reports_filesystem_errors() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("unpacked");
        fs::write(&blocker, b"file").unwrap();
        let paths = resolver(&temp);
        let mut app = App::new("a", "b", "c", "d");

        let err = paths.artifact_dir(&mut app).unwrap_err();
        assert!(matches!(err, ArtifactError::Filesystem { .. }));
        assert!(app.unpack_dir().is_none());
    }
}
