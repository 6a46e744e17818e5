mod commands;

pub use commands::{spawn_stdin_reader, Command, HELP_TEXT};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cast::{CastSession, Caster, DevicesInUse, DEFAULT_APP_SESSION_TIMEOUT};
use crate::config::Config;
use crate::media::{detect_lan_ip, MediaCatalog, MediaRef, MediaUrls};
use crate::network::DeviceRegistry;
use crate::scheduler::{local_now, run_jobs, ScheduleEntry, Scheduler};
use crate::server::MediaServer;
use crate::{clamp_volume, Action, Result};

/// How often due schedule entries are checked.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle after [`Orchestrator::start`] returns; startup itself either
/// yields a running orchestrator or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Draining,
    Stopped,
}

/// Owns the file server, the catalog, the schedule and the set of devices in
/// use, and drives ticks and operator commands against them.
pub struct Orchestrator {
    config: Config,
    caster: Arc<Caster>,
    scheduler: Scheduler,
    server: Option<MediaServer>,
    state: RunState,
    tasks: JoinSet<()>,
}

impl Orchestrator {
    /// Starts the file server, builds the catalog and registers the schedule.
    /// Fails only when the file server cannot start.
    pub async fn start(config: Config, registry: Arc<dyn DeviceRegistry>) -> Result<Self> {
        info!("Starting KittyCaster for '{}'", config.friendly_name);

        let server = match &config.serve_local_folder {
            Some(folder) => Some(MediaServer::start(folder, config.serve_port).await?),
            None => None,
        };
        let host = config
            .serve_host
            .clone()
            .unwrap_or_else(|| detect_lan_ip().to_string());
        let port = server.as_ref().map_or(config.serve_port, MediaServer::port);
        let urls = MediaUrls::new(host, port);

        let catalog = Arc::new(MediaCatalog::new());
        for media in config.configured_media() {
            catalog.insert(media);
        }
        if let (Some(folder), true) = (&config.serve_local_folder, config.include_local_media) {
            if let Err(e) = catalog.scan_directory(folder, &config.media_extensions) {
                warn!("Could not scan '{}' for media: {}", folder.display(), e);
            }
        }
        info!("Media catalog holds {} entries", catalog.len());

        let session = CastSession::new(registry)
            .with_timeouts(config.playback_timeout(), DEFAULT_APP_SESSION_TIMEOUT);
        let mut caster = Caster::new(
            session,
            catalog,
            Arc::new(DevicesInUse::new()),
            urls,
            config.discovery_timeout(),
        );
        if let Some(folder) = &config.serve_local_folder {
            caster = caster.with_served_dir(folder);
        }

        let mut scheduler = Scheduler::new();
        let now = local_now();
        for entry in config.schedule_entries() {
            scheduler.register(entry, now);
        }
        if scheduler.is_empty() {
            warn!("No schedule entries found");
        } else {
            info!("Loaded {} scheduled event(s)", scheduler.len());
        }

        Ok(Self {
            config,
            caster: Arc::new(caster),
            scheduler,
            server,
            state: RunState::Running,
            tasks: JoinSet::new(),
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn caster(&self) -> &Arc<Caster> {
        &self.caster
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn server(&self) -> Option<&MediaServer> {
        self.server.as_ref()
    }

    /// Runs until `q`, end of input, or `shutdown` completes, then drains.
    pub async fn run<S>(mut self, mut commands: mpsc::UnboundedReceiver<String>, shutdown: S) -> RunState
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("KittyCaster is running. Type 'help' for commands, 'q' to quit.");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick(),
                line = commands.recv() => match line {
                    Some(line) => {
                        if !self.handle_line(&line) {
                            break;
                        }
                    }
                    None => {
                        info!("End of input");
                        break;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Background task panicked: {}", e);
                        }
                    }
                }
            }
        }

        self.shutdown(true).await
    }

    /// Hands every due schedule entry to one runner task. Never blocks.
    fn tick(&mut self) {
        let due = self.scheduler.due(local_now());
        if due.is_empty() {
            return;
        }
        let caster = Arc::clone(&self.caster);
        self.tasks.spawn(async move {
            run_jobs(&caster, &due).await;
        });
    }

    /// Applies one input line. Returns `false` once the operator asked to quit.
    pub fn handle_line(&mut self, line: &str) -> bool {
        match Command::parse(line) {
            Command::Quit => {
                println!("Quitting...");
                return false;
            }
            Command::Empty => {}
            Command::Start(media) => self.spawn_start(media),
            Command::Stop => self.spawn_stop(),
            Command::List => {
                let entries = self.caster.catalog().list();
                if entries.is_empty() {
                    println!("Media catalog is empty.");
                }
                for (index, media) in entries.iter().enumerate() {
                    println!("{:>3}. {}", index + 1, media);
                }
            }
            Command::Jobs => {
                let upcoming = self.scheduler.upcoming();
                if upcoming.is_empty() {
                    println!("No scheduled events.");
                }
                for (next_run, entry) in upcoming {
                    println!("{} next at {}", entry, next_run.format("%Y-%m-%d %H:%M"));
                }
            }
            Command::Schedule {
                start,
                stop,
                media,
                volume,
            } => {
                let volume = volume.unwrap_or(self.config.volume);
                let (start_entry, stop_entry) = self.schedule_pair(start, stop, media, volume);
                println!("Scheduled {}", start_entry);
                println!("Scheduled {}", stop_entry);
            }
            Command::Help => println!("{}", HELP_TEXT),
            Command::Invalid(reason) => println!("{}", reason),
            Command::Unknown(input) => {
                println!("Unknown command '{}'. Type 'help' for commands.", input)
            }
        }
        true
    }

    /// Registers a daily start at `start` and stop at `stop` for the
    /// configured device.
    pub fn schedule_pair(
        &mut self,
        start: NaiveTime,
        stop: NaiveTime,
        media: Option<MediaRef>,
        volume: f32,
    ) -> (ScheduleEntry, ScheduleEntry) {
        let device = self.config.friendly_name.clone();
        let start_entry = ScheduleEntry {
            device: device.clone(),
            media,
            time: start,
            action: Action::Start,
            volume: clamp_volume(volume),
        };
        let stop_entry = ScheduleEntry {
            device,
            media: None,
            time: stop,
            action: Action::Stop,
            volume: clamp_volume(volume),
        };
        let now = local_now();
        self.scheduler.register(start_entry.clone(), now);
        self.scheduler.register(stop_entry.clone(), now);
        (start_entry, stop_entry)
    }

    fn spawn_start(&mut self, media: Option<MediaRef>) {
        let caster = Arc::clone(&self.caster);
        let device = self.config.friendly_name.clone();
        let volume = self.config.volume;
        self.tasks.spawn(async move {
            match caster.start(&device, media, volume).await {
                Ok(outcome) => println!("Started '{}' on {}", outcome.media, outcome.device),
                Err(e) => {
                    error!("Start on {} failed: {}", device, e);
                    println!("Could not start on {}: {}", device, e);
                }
            }
        });
    }

    fn spawn_stop(&mut self) {
        let caster = Arc::clone(&self.caster);
        let device = self.config.friendly_name.clone();
        self.tasks.spawn(async move {
            match caster.stop(&device).await {
                Ok(()) => println!("Stopped casting on {}", device),
                Err(e) => {
                    error!("Stop on {} failed: {}", device, e);
                    println!("Could not stop {}: {}", device, e);
                }
            }
        });
    }

    /// Lets in-flight work settle, optionally stops every device in use,
    /// then force-stops the file server.
    pub async fn shutdown(mut self, stop_devices: bool) -> RunState {
        self.state = RunState::Draining;
        info!("Shutting down");
        self.settle_in_flight().await;

        if stop_devices {
            let budget = self.config.discovery_timeout() + self.config.playback_timeout();
            match tokio::time::timeout(budget, self.caster.stop_all()).await {
                Ok(failed) if failed.is_empty() => {}
                Ok(failed) => warn!("Could not stop: {}", failed.join(", ")),
                Err(_) => warn!("Gave up stopping devices after {}s", budget.as_secs()),
            }
        }

        if let Some(server) = self.server.take() {
            server.stop(true).await;
        }
        self.state = RunState::Stopped;
        info!("KittyCaster stopped");
        self.state
    }

    /// Waits for running commands and jobs, so a cast still launching on the
    /// blocking pool is tracked before devices are stopped. Whatever outlives
    /// the bound of one full start is aborted.
    async fn settle_in_flight(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let budget = self.config.discovery_timeout()
            + DEFAULT_APP_SESSION_TIMEOUT
            + self.config.playback_timeout();
        info!("Waiting for {} in-flight operation(s)", self.tasks.len());

        let tasks = &mut self.tasks;
        let settled = tokio::time::timeout(budget, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if settled.is_err() {
            warn!(
                "Aborting {} operation(s) still running after {}s",
                self.tasks.len(),
                budget.as_secs()
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}
