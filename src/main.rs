use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kittycaster::config::Config;
use kittycaster::media::MediaRef;
use kittycaster::network::{CastRegistry, DeviceRegistry};
use kittycaster::orchestrator::{spawn_stdin_reader, Orchestrator};
use kittycaster::signals::wait_for_shutdown_signal;
use kittycaster::CasterError;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cast local media and YouTube videos to a Chromecast, on demand or on a daily schedule", long_about = None)]
struct Args {
    /// Config file (default: <config dir>/kittycaster/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default config file if none exists
    Init,

    /// Start or stop casting once
    Once {
        #[arg(long, conflicts_with = "stop", required_unless_present = "stop")]
        start: bool,

        #[arg(long)]
        stop: bool,

        /// Receiver name (default: friendly_name from the config)
        #[arg(long)]
        friendly_name: Option<String>,

        /// File name, http(s) URL or youtube:<id> (default: random catalog pick)
        #[arg(long)]
        media: Option<String>,

        /// 0.0 to 1.0 (default: volume from the config)
        #[arg(long)]
        volume: Option<f32>,
    },

    /// Run the schedule and the interactive command loop
    #[command(alias = "schedule")]
    Run {
        /// Do not read commands from stdin
        #[arg(long)]
        no_interactive: bool,
    },

    /// List receivers on the local network
    Devices {
        /// Seconds to browse
        #[arg(long, default_value_t = 5)]
        timeout: u64,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match args.config.clone().or_else(Config::default_path) {
        Some(path) => path,
        None => anyhow::bail!("Could not determine a config directory; pass --config"),
    };

    // The log destination may come from the config, so peek at it before
    // logging starts.
    let log_file = args.log_file.clone().or_else(|| {
        Config::from_file(&config_path)
            .ok()
            .and_then(|config| config.log_file)
    });
    init_tracing(log_file.as_deref())?;

    tracing::info!("KittyCaster v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Init => {
            if Config::write_default(&config_path)? {
                println!("Created default config at {}", config_path.display());
            } else {
                println!("Config already exists at {}", config_path.display());
            }
            Ok(())
        }
        Commands::Once {
            start,
            stop: _,
            friendly_name,
            media,
            volume,
        } => {
            let config = Config::load_or_default(&config_path);
            once(config, start, friendly_name, media, volume).await
        }
        Commands::Run { no_interactive } => {
            let config = Config::load_or_default(&config_path);
            run(config, no_interactive).await
        }
        Commands::Devices { timeout, json } => devices(Duration::from_secs(timeout), json).await,
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Could not open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

async fn once(
    mut config: Config,
    start: bool,
    friendly_name: Option<String>,
    media: Option<String>,
    volume: Option<f32>,
) -> anyhow::Result<()> {
    let device = friendly_name.unwrap_or_else(|| config.friendly_name.clone());
    let volume = volume.unwrap_or(config.volume);
    let media = media.map(|reference| MediaRef::parse(&reference));

    config.schedule.clear();
    let needs_server = start
        && media
            .as_ref()
            .map_or(config.serve_local_folder.is_some(), MediaRef::is_local);
    if !needs_server {
        config.serve_local_folder = None;
    }

    let registry: Arc<dyn DeviceRegistry> = Arc::new(CastRegistry::default());
    let orchestrator = Orchestrator::start(config, registry).await?;

    let result = if start {
        let started = orchestrator.caster().start(&device, media, volume).await;
        if let Ok(outcome) = &started {
            println!("Started '{}' on {}", outcome.media, outcome.device);
            if outcome.media.is_local() && orchestrator.server().is_some() {
                println!("Serving the file until Ctrl+C...");
                if let Err(e) = wait_for_shutdown_signal().await {
                    tracing::error!("Could not listen for shutdown signals: {}", e);
                }
            }
        }
        started.map(|_| ())
    } else {
        orchestrator.caster().stop(&device).await.map(|()| {
            println!("Stopped casting on {}", device);
        })
    };

    orchestrator.shutdown(false).await;
    result.map_err(report)
}

async fn run(config: Config, no_interactive: bool) -> anyhow::Result<()> {
    let registry: Arc<dyn DeviceRegistry> = Arc::new(CastRegistry::default());
    let orchestrator = Orchestrator::start(config, registry).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    // Without a reader the sender stays here so input never "ends".
    let idle_input = if no_interactive {
        Some(tx)
    } else {
        spawn_stdin_reader(tx)?;
        None
    };

    let shutdown = async {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!("Could not listen for shutdown signals: {}", e);
            std::future::pending::<()>().await;
        }
    };
    orchestrator.run(rx, shutdown).await;
    drop(idle_input);
    Ok(())
}

async fn devices(window: Duration, json: bool) -> anyhow::Result<()> {
    let registry = CastRegistry::default();
    let devices = registry.discovery().discover_all(window).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No Chromecasts found.");
    }
    for device in devices {
        println!(
            "{}  {}:{}  {}",
            device.name,
            device.address,
            device.port,
            device.model.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn report(err: CasterError) -> anyhow::Error {
    if let Some(discovered) = err.discovered_devices() {
        if !discovered.is_empty() {
            println!("Discovered devices: {}", discovered.join(", "));
        }
    }
    err.into()
}
