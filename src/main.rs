mod adb;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ffupdater_core::{
    select_installer, App, AppUpdater, DeviceEnvironment, FilePreferences, HttpApiConsumer,
    InstalledMetadataRegister, MetadataCache, MetadataFetcher, SignatureVerifier, UpdateStatus,
    UpdaterConfig, Upstreams,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adb::AdbDevice;

/// Keep the Firefox family on an Android device up to date.
#[derive(Parser, Debug)]
#[clap(version, about = "Firefox updater for Android devices")]
struct Args {
    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// JSON configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// adb serial of the target device
    #[clap(short, long)]
    serial: Option<String>,

    /// Device ABIs, most preferred first (queried through adb when omitted)
    #[clap(long, value_delimiter = ',')]
    abi: Option<Vec<String>>,

    /// Device API level (queried through adb when omitted)
    #[clap(long)]
    api_level: Option<u32>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the app catalog
    List,
    /// Check installed apps (or the given ones) for updates
    Check {
        apps: Vec<App>,
        /// Print the result as JSON
        #[clap(long)]
        json: bool,
    },
    /// Verify the signing certificate of an APK file
    Verify { app: App, apk: PathBuf },
    /// Download, verify and install the latest release of an app
    Install {
        app: App,
        /// Use the installer activity instead of an install session
        #[clap(long)]
        intent: bool,
    },
}

fn init_logging(debug: bool) {
    let default = if debug {
        "info,ffupdater_core=debug,ffupdater=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn device_environment(args: &Args, adb: &AdbDevice) -> Result<DeviceEnvironment> {
    let api_level = match args.api_level {
        Some(level) => level,
        None => adb.api_level().context("could not read the device API level")?,
    };
    let abis = match &args.abi {
        Some(abis) => abis.clone(),
        None => match adb.abis() {
            Ok(abis) => abis,
            Err(err) => {
                warn!(error = %err, "could not read the device ABIs, assuming the host architecture");
                return Ok(DeviceEnvironment::detect(api_level));
            }
        },
    };
    Ok(DeviceEnvironment::new(abis, api_level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = UpdaterConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    match &args.command {
        Command::List => {
            for app in App::all() {
                let spec = app.spec();
                println!(
                    "{:<16} {:<26} {:<10} {}",
                    app.id(),
                    spec.package_name,
                    spec.release_id_kind.to_string(),
                    spec.title
                );
            }
            Ok(())
        }
        Command::Verify { app, apk } => {
            let result = SignatureVerifier::new().verify_apk_file(*app, apk).await?;
            println!("{app}: {result}");
            if !result.is_valid() {
                bail!("{} is not signed by the publisher of {app}", apk.display());
            }
            Ok(())
        }
        Command::Check { apps, json } => check(&args, &config, apps, *json).await,
        Command::Install { app, intent } => install(&args, &config, *app, *intent).await,
    }
}

struct Session {
    adb: Arc<AdbDevice>,
    device: Arc<DeviceEnvironment>,
    cache: MetadataCache,
    register: InstalledMetadataRegister,
    fetcher: MetadataFetcher,
    api: Arc<HttpApiConsumer>,
}

fn open_session(args: &Args, config: &UpdaterConfig) -> Result<Session> {
    let adb = Arc::new(AdbDevice::new(args.serial.clone()));
    let device = Arc::new(device_environment(args, &adb)?);
    let prefs = Arc::new(
        FilePreferences::open(config.preferences_path()).context("failed to open preferences")?,
    );
    let cache = MetadataCache::new(prefs.clone(), config.cache_ttl());
    let register = InstalledMetadataRegister::new(adb.clone(), prefs);
    let api = Arc::new(HttpApiConsumer::builder().config(config).build()?);
    let fetcher = MetadataFetcher::new(Upstreams::new(api.clone(), config), device.clone())?
        .with_cache(cache.clone());
    Ok(Session {
        adb,
        device,
        cache,
        register,
        fetcher,
        api,
    })
}

async fn check(args: &Args, config: &UpdaterConfig, apps: &[App], json: bool) -> Result<()> {
    let session = open_session(args, config)?;
    let apps: Vec<App> = if apps.is_empty() {
        session.register
            .installed_apps()
            .into_iter()
            .filter(|app| session.device.is_supported(*app))
            .collect()
    } else {
        apps.to_vec()
    };
    info!(count = apps.len(), platform = %session.device.best_platform(), "checking for updates");

    let handles = session.fetcher.fetch_metadata(apps.iter().copied());
    let results = futures::future::join_all(
        apps.iter()
            .filter_map(|app| handles.get(app).map(|handle| (*app, handle.clone())))
            .map(|(app, handle)| async move { (app, handle.wait().await) }),
    )
    .await;

    let mut report = BTreeMap::new();
    for (app, available) in results {
        let line = match available {
            Ok(available) => {
                let installed = session.register.get_metadata(app)?;
                let status = UpdateStatus::evaluate(
                    app,
                    installed.as_ref(),
                    session.register.is_installed(app),
                    &available,
                )?;
                serde_json::to_value(&status)?
            }
            Err(err) if err.is_unsupported() => {
                serde_json::json!({ "status": "unsupported", "reason": err.to_string() })
            }
            Err(err) => {
                serde_json::json!({ "status": "error", "reason": format!("could not check for updates: {err}") })
            }
        };
        report.insert(app.id(), line);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (app, line) in &report {
            println!("{app:<16} {line}");
        }
    }
    Ok(())
}

async fn install(args: &Args, config: &UpdaterConfig, app: App, intent: bool) -> Result<()> {
    let session = open_session(args, config)?;
    let available = session
        .fetcher
        .fetch(app)
        .wait_timeout(config.request_timeout() * 3)
        .await
        .with_context(|| format!("could not fetch the latest release of {app}"))?;

    let supports_sessions = !intent && session.device.api_level() >= 21;
    let installer = select_installer(supports_sessions, session.adb.clone());
    let updater = AppUpdater::new(session.api.clone(), session.register.clone(), installer, &config.download_dir)
        .with_cache(session.cache.clone());

    let outcome = updater.download_and_install(app, &available).await?;
    println!(
        "{app}: installed {} (certificate {})",
        outcome.release_id, outcome.fingerprint
    );
    Ok(())
}
