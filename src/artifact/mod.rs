//! Unpack and cleanup lifecycle for an app's package.
//!
//! Unpacking shells out to the disassembler (`apktool d -s <apk> -o <dir> -f`)
//! and writes into the directory resolved by [`PathResolver`]. The only way to
//! remove an unpacked tree is [`ArtifactManager::cleanup`]; nothing is removed
//! on drop, so callers scope their work with [`ArtifactManager::with_unpacked`]
//! or call cleanup themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! use xray_analyzer::{App, ArtifactManager, Config};
//!
//! let config = xray_analyzer::config::load("/etc/xray/config.json".as_ref())?;
//! let artifacts = ArtifactManager::from_config(&config, tracing::Span::current());
//! let mut app = App::by_path("/downloads/some.apk");
//! let manifest = artifacts.with_unpacked(&mut app, |dir| {
//!     Ok(std::fs::read_to_string(dir.join("AndroidManifest.xml"))?)
//! })?;
//! ```

mod disassembler;
mod error;

pub use disassembler::Disassembler;
pub use error::ArtifactError;

use anyhow::Result;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::Span;

use crate::app::App;
use crate::config::Config;
use crate::paths::PathResolver;

#[derive(Debug, Clone)]
pub struct ArtifactManager {
    paths: PathResolver,
    disassembler: Disassembler,
    span: Span,
}

impl ArtifactManager {
    pub fn new(paths: PathResolver, disassembler: Disassembler, span: Span) -> Self {
        Self {
            paths,
            disassembler,
            span,
        }
    }

    pub fn from_config(config: &Config, span: Span) -> Self {
        Self::new(
            PathResolver::from_config(config),
            Disassembler::from_config(&config.disassembler),
            span,
        )
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    /// Disassemble the app's package into its artifact directory.
    ///
    /// Safe to call repeatedly: the disassembler runs with force-overwrite, so
    /// a second unpack replaces the previous tree.
    pub fn unpack(&self, app: &mut App) -> Result<PathBuf, ArtifactError> {
        let _enter = self.span.enter();

        let package = self.paths.package_path(app);
        check_readable(&package)?;

        let dir = self.paths.artifact_dir(app)?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::filesystem(parent, source))?;
        }

        let _lock = UnpackLock::acquire(&dir)?;
        tracing::debug!(app = %app.label(), package = %package.display(), dir = %dir.display(), "unpacking");
        self.disassembler.decode(&package, &dir)?;
        touch(&dir)?;

        tracing::info!(app = %app.label(), dir = %dir.display(), "unpacked");
        Ok(dir)
    }

    /// Remove the app's artifact directory. Removing a directory that was
    /// never created is not an error; one that is being unpacked is
    /// [`ArtifactError::Locked`].
    pub fn cleanup(&self, app: &App) -> Result<(), ArtifactError> {
        let _enter = self.span.enter();

        let Some(dir) = self.paths.planned_artifact_dir(app) else {
            return Ok(());
        };
        match fs::symlink_metadata(&dir) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(ArtifactError::filesystem(&dir, source)),
        }

        let _lock = UnpackLock::acquire(&dir)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(app = %app.label(), dir = %dir.display(), "removed artifact directory");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::filesystem(&dir, source)),
        }
    }

    /// Unpack, run `f` on the artifact directory, then clean up whatever
    /// happened inside `f`.
    pub fn with_unpacked<T, F>(&self, app: &mut App, f: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let dir = match self.unpack(app) {
            Ok(dir) => dir,
            // another unpack owns the directory
            Err(err @ ArtifactError::Locked { .. }) => return Err(err.into()),
            Err(err) => {
                if let Err(cleanup_err) = self.cleanup(app) {
                    tracing::warn!(parent: &self.span, app = %app.label(), error = %cleanup_err, "cleanup after failed unpack failed");
                }
                return Err(err.into());
            }
        };

        let result = f(&dir);
        match (result, self.cleanup(app)) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err.into()),
            (Err(err), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    tracing::warn!(parent: &self.span, app = %app.label(), error = %cleanup_err, "cleanup failed");
                }
                Err(err)
            }
        }
    }
}

fn check_readable(package: &Path) -> Result<(), ArtifactError> {
    let meta = match fs::metadata(package) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ArtifactError::NotFound {
                path: package.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ArtifactError::Unreadable {
                path: package.to_path_buf(),
                source,
            })
        }
    };
    if meta.is_dir() {
        return Err(ArtifactError::Unreadable {
            path: package.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "is a directory"),
        });
    }
    File::open(package).map_err(|source| ArtifactError::Unreadable {
        path: package.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Mark the directory as freshly unpacked for downstream consumers.
fn touch(dir: &Path) -> Result<(), ArtifactError> {
    File::open(dir)
        .and_then(|handle| handle.set_modified(SystemTime::now()))
        .map_err(|source| ArtifactError::filesystem(dir, source))
}

/// Exclusive advisory lock on `<parent>/.<name>.lock`, held while the
/// disassembler writes into the directory or cleanup removes it.
///
/// The lock file is left in place on release. Unlinking it would let one
/// process lock the old inode while another creates and locks a new one.
#[derive(Debug)]
struct UnpackLock {
    _file: File,
}

impl UnpackLock {
    fn acquire(dir: &Path) -> Result<Self, ArtifactError> {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let path = dir.with_file_name(format!(".{name}.lock"));

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| ArtifactError::filesystem(&path, source))?;

        if file.try_lock_exclusive().is_err() {
            return Err(ArtifactError::Locked {
                path: dir.to_path_buf(),
            });
        }

        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Stands in for apktool: copies the package into `<out>/original.apk`,
    /// writes a manifest and logs each invocation.
    const FAKE_APKTOOL: &str = r#"
[ "$1" = "d" ] || { echo "unexpected mode $1" >&2; exit 2; }
[ "$2" = "-s" ] || { echo "missing -s" >&2; exit 2; }
[ "$4" = "-o" ] || { echo "missing -o" >&2; exit 2; }
[ "$6" = "-f" ] || { echo "missing -f" >&2; exit 2; }
mkdir -p "$5/smali"
cp "$3" "$5/original.apk"
echo '<manifest package="com.example"/>' > "$5/AndroidManifest.xml"
echo "$3" >> "$(dirname "$0")/invocations.log"
echo "I: Using fake apktool"
"#;

    const FAILING_APKTOOL: &str = r#"
echo "I: Using fake apktool"
echo "brut.androlib.AndrolibException: Could not decode arsc file" >&2
exit 3
"#;

    struct Fixture {
        temp: TempDir,
        manager: ArtifactManager,
    }

    impl Fixture {
        fn new(script: &str) -> Self {
            let temp = TempDir::new().unwrap();
            let tool_dir = temp.path().join("tool");
            fs::create_dir_all(&tool_dir).unwrap();
            let script_path = tool_dir.join("apktool.sh");
            fs::write(&script_path, script).unwrap();

            let paths = PathResolver::new(temp.path().join("apps"), temp.path().join("unpacked"));
            let disassembler = Disassembler::new("sh", vec![script_path.display().to_string()]);
            let manager = ArtifactManager::new(paths, disassembler, Span::none());
            Self { temp, manager }
        }

        fn archived_app(&self) -> App {
            let app = App::new("com.example", "play", "us", "1.0");
            let package = self.manager.paths().package_path(&app);
            fs::create_dir_all(package.parent().unwrap()).unwrap();
            fs::write(&package, b"PK\x03\x04 fake apk").unwrap();
            app
        }

        fn invocations(&self) -> usize {
            fs::read_to_string(self.temp.path().join("tool/invocations.log"))
                .map(|log| log.lines().count())
                .unwrap_or(0)
        }
    }

    #[test]
    fn unpack_populates_identity_dir() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = fixture.archived_app();

        let dir = fixture.manager.unpack(&mut app).unwrap();
        assert_eq!(
            dir,
            fixture.temp.path().join("unpacked/com.example/play/us/1.0")
        );
        assert!(dir.join("AndroidManifest.xml").is_file());
        assert!(dir.join("smali").is_dir());
        assert_eq!(fs::read(dir.join("original.apk")).unwrap(), b"PK\x03\x04 fake apk");
        // lock is released once unpack returns
        assert!(dir.with_file_name(".1.0.lock").is_file());
        drop(UnpackLock::acquire(&dir).unwrap());
    }

    #[test]
    fn unpack_twice_is_idempotent() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = fixture.archived_app();

        let first = fixture.manager.unpack(&mut app).unwrap();
        let second = fixture.manager.unpack(&mut app).unwrap();
        assert_eq!(first, second);
        assert!(second.join("AndroidManifest.xml").is_file());
        assert_eq!(fixture.invocations(), 2);
    }

    #[test]
    fn unpack_refreshes_mtime() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = fixture.archived_app();
        let dir = fixture.manager.paths().artifact_dir(&mut app).unwrap();

        let old = SystemTime::now() - Duration::from_secs(3600);
        File::open(&dir).unwrap().set_modified(old).unwrap();

        fixture.manager.unpack(&mut app).unwrap();
        let modified = fs::metadata(&dir).unwrap().modified().unwrap();
        assert!(modified > old + Duration::from_secs(1800));
    }

    #[test]
    fn missing_package_is_not_found() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = App::new("com.missing", "play", "us", "1.0");

        let err = fixture.manager.unpack(&mut app).unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
        assert_eq!(err.kind(), "not_found");
        assert_eq!(fixture.invocations(), 0);
    }

    #[test]
    fn unreadable_package_is_distinct_from_missing() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let package = fixture.temp.path().join("dir.apk");
        fs::create_dir_all(&package).unwrap();
        let mut app = App::by_path(&package);

        let err = fixture.manager.unpack(&mut app).unwrap_err();
        assert!(matches!(err, ArtifactError::Unreadable { .. }));
    }

    #[test]
    fn failing_disassembler_surfaces_output() {
        let fixture = Fixture::new(FAILING_APKTOOL);
        let mut app = fixture.archived_app();

        let err = fixture.manager.unpack(&mut app).unwrap_err();
        match &err {
            ArtifactError::Disassembler { status, output, .. } => {
                assert_eq!(status.code(), Some(3));
                assert!(output.contains("Using fake apktool"));
                assert!(output.contains("Could not decode arsc file"));
                let stdout_at = output.find("Using fake apktool").unwrap();
                let stderr_at = output.find("Could not decode").unwrap();
                assert!(stdout_at < stderr_at);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("output below"));
    }

    #[test]
    fn missing_disassembler_is_spawn_error() {
        let temp = TempDir::new().unwrap();
        let paths = PathResolver::new(temp.path().join("apps"), temp.path().join("unpacked"));
        let manager = ArtifactManager::new(
            paths,
            Disassembler::new("definitely_not_a_real_command_12345", Vec::new()),
            Span::none(),
        );
        let package = temp.path().join("x.apk");
        fs::write(&package, b"apk").unwrap();
        let mut app = App::by_path(&package);

        let err = manager.unpack(&mut app).unwrap_err();
        assert!(matches!(err, ArtifactError::Spawn { .. }));
    }

    #[test]
    fn unpack_by_path_uses_temp_dir() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let package = fixture.temp.path().join("adhoc.apk");
        fs::write(&package, b"apk").unwrap();
        let mut app = App::by_path(&package);

        let dir = fixture.manager.unpack(&mut app).unwrap();
        assert!(dir.starts_with(fixture.temp.path().join("unpacked")));
        assert!(dir.join("original.apk").is_file());

        fixture.manager.cleanup(&app).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn cleanup_never_created_is_ok() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let app = App::new("never", "play", "us", "1");
        fixture.manager.cleanup(&app).unwrap();

        let by_path = App::by_path("/nowhere/never.apk");
        fixture.manager.cleanup(&by_path).unwrap();
    }

    #[test]
    fn cleanup_twice_is_ok() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = fixture.archived_app();
        let dir = fixture.manager.unpack(&mut app).unwrap();

        fixture.manager.cleanup(&app).unwrap();
        assert!(!dir.exists());
        fixture.manager.cleanup(&app).unwrap();
    }

    #[test]
    fn with_unpacked_cleans_up_on_success_and_failure() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = fixture.archived_app();

        let manifest = fixture
            .manager
            .with_unpacked(&mut app, |dir| {
                Ok(fs::read_to_string(dir.join("AndroidManifest.xml"))?)
            })
            .unwrap();
        assert!(manifest.contains("com.example"));
        let dir = app.unpack_dir().unwrap().to_path_buf();
        assert!(!dir.exists());

        let result: Result<()> = fixture
            .manager
            .with_unpacked(&mut app, |_| anyhow::bail!("analysis failed"));
        assert_eq!(result.unwrap_err().to_string(), "analysis failed");
        assert!(!dir.exists());
    }

    #[test]
    fn concurrent_unpack_is_rejected_while_locked() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = fixture.archived_app();
        let dir = fixture.manager.paths().artifact_dir(&mut app).unwrap();

        let held = UnpackLock::acquire(&dir).unwrap();
        let err = fixture.manager.unpack(&mut app).unwrap_err();
        assert!(matches!(err, ArtifactError::Locked { .. }));
        drop(held);

        fixture.manager.unpack(&mut app).unwrap();
    }

    #[test]
    fn locked_directory_is_left_alone() {
        let fixture = Fixture::new(FAKE_APKTOOL);
        let mut app = fixture.archived_app();
        let dir = fixture.manager.paths().artifact_dir(&mut app).unwrap();
        fs::write(dir.join("in-progress"), b"other unpack").unwrap();

        let held = UnpackLock::acquire(&dir).unwrap();
        let result: Result<()> = fixture.manager.with_unpacked(&mut app, |_| Ok(()));
        let err = result.unwrap_err().downcast::<ArtifactError>().unwrap();
        assert!(matches!(err, ArtifactError::Locked { .. }));
        assert!(dir.join("in-progress").is_file());

        let err = fixture.manager.cleanup(&app).unwrap_err();
        assert!(matches!(err, ArtifactError::Locked { .. }));
        assert!(dir.join("in-progress").is_file());

        drop(held);
        fixture.manager.cleanup(&app).unwrap();
        assert!(!dir.exists());
    }
}
