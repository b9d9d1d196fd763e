use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info_span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use xray_analyzer::attribution::geo::GeoLocator;
use xray_analyzer::config::{self, Config, DEFAULT_CONFIG_PATH};
use xray_analyzer::{
    preflight, App, ArtifactManager, AttributionClient, Disassembler, MappingOrchestrator,
    SqliteHostStore,
};

/// xray analyzer: app unpacking and host-to-company mapping
#[derive(Parser, Debug)]
#[command(name = "xray-analyzer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file location
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    cfg: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Map every recorded app host to its company and store the results
    MapHosts,

    /// Unpack an app's package and print the artifact directory
    Unpack(AppSelector),

    /// Remove an app's artifact directory
    Cleanup(AppSelector),

    /// Geolocate the servers behind a hostname
    Geoip {
        host: String,
    },

    /// Check that the disassembler is installed
    Preflight,
}

#[derive(Args, Debug)]
struct AppSelector {
    /// Package file to analyze instead of an archived app
    #[arg(long, conflicts_with_all = ["id", "store", "region", "app_version"])]
    path: Option<PathBuf>,

    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    store: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long = "app-version")]
    app_version: Option<String>,

    /// Artifact directory from an earlier `unpack --path` run
    #[arg(long)]
    unpack_dir: Option<PathBuf>,
}

impl AppSelector {
    fn into_app(self) -> Result<App> {
        let app = match (self.path, self.id, self.store, self.region, self.app_version) {
            (Some(path), ..) => App::by_path(path),
            (None, Some(id), Some(store), Some(region), Some(version)) => {
                App::new(id, store, region, version)
            }
            _ => bail!("either --path or all of --id, --store, --region and --app-version are required"),
        };
        Ok(match self.unpack_dir {
            Some(dir) => app.with_unpack_dir(dir),
            None => app,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let root = info_span!("xray");
    let config = config::load(&cli.cfg)?;
    config
        .validate()
        .with_context(|| format!("validating config '{}'", cli.cfg.display()))?;

    match cli.command {
        Commands::MapHosts => map_hosts(&config, &root),
        Commands::Unpack(selector) => unpack(&config, &root, selector),
        Commands::Cleanup(selector) => cleanup(&config, &root, selector),
        Commands::Geoip { host } => geoip(&config, &root, &host),
        Commands::Preflight => {
            preflight::check_disassembler(&Disassembler::from_config(&config.disassembler))?;
            println!("[preflight] disassembler found");
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn map_hosts(config: &Config, root: &tracing::Span) -> Result<()> {
    let db_path = config.database_path();
    let mut store = SqliteHostStore::open(&db_path)
        .with_context(|| format!("opening host database '{}'", db_path.display()))?;
    let client = AttributionClient::new(
        &config.attribution,
        info_span!(parent: root, "attribution", endpoint = %config.attribution.endpoint),
    )
    .context("building attribution client")?;

    let report =
        MappingOrchestrator::new(&mut store, &client, info_span!(parent: root, "map_hosts"))
            .run()?;

    println!(
        "[map-hosts] apps: {} ({} failed), hosts: {} mapped, {} failed",
        report.apps_seen, report.app_failures, report.hosts_mapped, report.host_failures
    );
    Ok(())
}

fn unpack(config: &Config, root: &tracing::Span, selector: AppSelector) -> Result<()> {
    let artifacts = ArtifactManager::from_config(config, info_span!(parent: root, "artifact"));
    let mut app = selector.into_app()?;
    let dir = artifacts
        .unpack(&mut app)
        .with_context(|| format!("unpacking '{}'", app.label()))?;
    println!("{}", dir.display());
    Ok(())
}

fn cleanup(config: &Config, root: &tracing::Span, selector: AppSelector) -> Result<()> {
    let artifacts = ArtifactManager::from_config(config, info_span!(parent: root, "artifact"));
    let app = selector.into_app()?;
    if let Some(dir) = app.unpack_dir() {
        if !dir.starts_with(artifacts.paths().unpack_root()) {
            bail!(
                "refusing to remove '{}': not under the unpack directory '{}'",
                dir.display(),
                artifacts.paths().unpack_root().display()
            );
        }
    }
    artifacts
        .cleanup(&app)
        .with_context(|| format!("cleaning up '{}'", app.label()))?;
    Ok(())
}

fn geoip(config: &Config, root: &tracing::Span, host: &str) -> Result<()> {
    let geo = GeoLocator::new(config.geoip.host.clone(), info_span!(parent: root, "geoip"))?;
    for info in geo.lookup(host)? {
        println!("{}", serde_json::to_string(&info)?);
    }
    Ok(())
}
