//! Analyzer configuration.
//!
//! The configuration is loaded once at startup and handed to each component
//! explicitly. JSON is the native format (`/etc/xray/config.json`); a file with
//! a `.toml` extension is parsed as TOML instead.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/xray/config.json";
pub const DEFAULT_DATA_DIR: &str = "/usr/local/var/xray";
pub const DEFAULT_UNPACK_DIR: &str = "/tmp/unpacked_apks";
pub const DEFAULT_SOCK_PATH: &str = "/var/run/apkScraper";
pub const DEFAULT_ATTRIBUTION_ENDPOINT: &str = "http://localhost:8080";
pub const DEFAULT_GEOIP_HOST: &str = "http://localhost:8081/json";
pub const DEFAULT_DISASSEMBLER: &str = "apktool";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Database connection parameters.
///
/// The SQLite store uses `database` as the database file; relative paths are
/// resolved against the data directory.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DbConfig {
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AnalyzerToml {
    db: DbConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ATTRIBUTION_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl AttributionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    pub host: String,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_GEOIP_HOST.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisassemblerConfig {
    pub program: PathBuf,
    /// Arguments placed before the decode arguments, e.g.
    /// `["-jar", "/opt/apktool.jar"]` with `program = "java"`.
    pub args: Vec<String>,
}

impl Default for DisassemblerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_DISASSEMBLER),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigToml {
    datadir: String,
    unpackdir: String,
    sockpath: String,
    analyzer: AnalyzerToml,
    attribution: AttributionConfig,
    geoip: GeoIpConfig,
    disassembler: DisassemblerConfig,
}

/// Fully resolved configuration with defaults applied and paths cleaned.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Always `data_dir/apps`.
    pub app_dir: PathBuf,
    pub unpack_dir: PathBuf,
    pub sock_path: PathBuf,
    pub db: DbConfig,
    pub attribution: AttributionConfig,
    pub geoip: GeoIpConfig,
    pub disassembler: DisassemblerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(ConfigToml::default())
    }
}

impl Config {
    /// Config rooted at `data_dir` with everything else defaulted.
    ///
    /// The unpack directory lives under the data directory so the result is
    /// self-contained, which is what tests and ad-hoc runs want.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self::from_raw(ConfigToml {
            datadir: data_dir.display().to_string(),
            unpackdir: data_dir.join("unpacked").display().to_string(),
            ..ConfigToml::default()
        })
    }

    fn from_raw(raw: ConfigToml) -> Self {
        let data_dir = non_empty_or(&raw.datadir, DEFAULT_DATA_DIR);
        let unpack_dir = non_empty_or(&raw.unpackdir, DEFAULT_UNPACK_DIR);
        let sock_path = non_empty_or(&raw.sockpath, DEFAULT_SOCK_PATH);
        let app_dir = clean_path(&data_dir.join("apps"));

        let mut attribution = raw.attribution;
        if attribution.endpoint.trim().is_empty() {
            attribution.endpoint = DEFAULT_ATTRIBUTION_ENDPOINT.to_string();
        }
        if attribution.max_attempts == 0 {
            attribution.max_attempts = 1;
        }

        Self {
            data_dir: clean_path(&data_dir),
            app_dir,
            unpack_dir: clean_path(&unpack_dir),
            sock_path: clean_path(&sock_path),
            db: raw.analyzer.db,
            attribution,
            geoip: raw.geoip,
            disassembler: raw.disassembler,
        }
    }

    /// Check that the app and unpack directories exist, creating them when
    /// missing. Run once at startup.
    pub fn validate(&self) -> Result<()> {
        ensure_dir(&self.app_dir, "app directory")?;
        ensure_dir(&self.unpack_dir, "unpack directory")?;
        if self.attribution.timeout_secs == 0 {
            bail!("attribution.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Location of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        let name = if self.db.database.trim().is_empty() {
            "xray.db"
        } else {
            self.db.database.trim()
        };
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.data_dir.join(candidate)
        }
    }
}

/// Load the configuration file at `path`.
pub fn load(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file '{}'", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let raw: ConfigToml = if is_toml {
        toml::from_str(&contents)
            .with_context(|| format!("parsing TOML config '{}'", path.display()))?
    } else {
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing JSON config '{}'", path.display()))?
    };

    let config = Config::from_raw(raw);
    tracing::info!(
        app_dir = %config.app_dir.display(),
        unpack_dir = %config.unpack_dir.display(),
        sock_path = %config.sock_path.display(),
        "loaded config"
    );
    Ok(config)
}

fn ensure_dir(dir: &Path, name: &str) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => bail!("{} '{}' isn't a directory", name, dir.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => fs::create_dir_all(dir)
            .with_context(|| format!("creating {} '{}'", name, dir.display())),
        Err(err) => {
            Err(err).with_context(|| format!("checking {} '{}'", name, dir.display()))
        }
    }
}

fn non_empty_or(value: &str, default: &str) -> PathBuf {
    if value.trim().is_empty() {
        PathBuf::from(default)
    } else {
        PathBuf::from(value)
    }
}

/// Lexically normalize a path: drop `.` segments and resolve `..` against
/// preceding segments without touching the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
