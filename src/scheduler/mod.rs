use std::fmt;

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use tracing::{error, info, warn};

use crate::cast::Caster;
use crate::media::MediaRef;
use crate::{Action, CasterError, Result};

/// One daily event. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub device: String,
    pub media: Option<MediaRef>,
    /// Local wall-clock time, every day.
    pub time: NaiveTime,
    pub action: Action,
    pub volume: f32,
}

impl ScheduleEntry {
    pub fn parse_time(value: &str) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map_err(|e| CasterError::Config(format!("invalid time '{}' (expected HH:MM): {}", value, e)))
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Action::Start => write!(
                f,
                "[Time={}, Action={}, Device={}, Media={}, Volume={:.3}]",
                self.time.format("%H:%M"),
                self.action,
                self.device,
                self.media
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "random".to_string()),
                self.volume
            ),
            Action::Stop => write!(
                f,
                "[Time={}, Action={}, Device={}]",
                self.time.format("%H:%M"),
                self.action,
                self.device
            ),
        }
    }
}

/// Identity of a registered job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub time: NaiveTime,
    pub action: Action,
    pub device: String,
}

#[derive(Debug, Clone)]
struct Job {
    entry: ScheduleEntry,
    next_run: NaiveDateTime,
}

/// First occurrence of `at` strictly after `after`.
pub fn next_occurrence(at: NaiveTime, after: NaiveDateTime) -> NaiveDateTime {
    let same_day = after.date().and_time(at);
    if same_day > after {
        same_day
    } else {
        same_day + ChronoDuration::days(1)
    }
}

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Daily recurring jobs. Pure bookkeeping: `due` says what to run, callers
/// run it.
#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: ScheduleEntry, now: NaiveDateTime) -> JobKey {
        let key = JobKey {
            time: entry.time,
            action: entry.action,
            device: entry.device.clone(),
        };
        let next_run = next_occurrence(entry.time, now);
        info!("Scheduled {} (next run {})", entry, next_run.format("%Y-%m-%d %H:%M"));
        self.jobs.push(Job { entry, next_run });
        key
    }

    /// Entries whose time arrived at or before `now`, in registration order.
    /// Each returned job is rescheduled for its next daily occurrence.
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<ScheduleEntry> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_run <= now {
                due.push(job.entry.clone());
                job.next_run = next_occurrence(job.entry.time, now);
            }
        }
        due
    }

    /// Runs every due job in order and returns each result.
    pub async fn tick(&mut self, caster: &Caster, now: NaiveDateTime) -> Vec<Result<()>> {
        let due = self.due(now);
        run_jobs(caster, &due).await
    }

    pub fn list(&self) -> Vec<ScheduleEntry> {
        self.jobs.iter().map(|job| job.entry.clone()).collect()
    }

    pub fn upcoming(&self) -> Vec<(NaiveDateTime, ScheduleEntry)> {
        let mut upcoming: Vec<_> = self
            .jobs
            .iter()
            .map(|job| (job.next_run, job.entry.clone()))
            .collect();
        upcoming.sort_by_key(|(next_run, _)| *next_run);
        upcoming
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Runs one scheduled event against `caster`.
pub async fn fire(entry: &ScheduleEntry, caster: &Caster) -> Result<()> {
    info!("Running scheduled event {}", entry);
    match entry.action {
        Action::Start => {
            let outcome = caster
                .start(&entry.device, entry.media.clone(), entry.volume)
                .await?;
            info!("Scheduled start: '{}' playing on {}", outcome.media, outcome.device);
        }
        Action::Stop => {
            caster.stop(&entry.device).await?;
            info!("Scheduled stop done on {}", entry.device);
        }
    }
    Ok(())
}

/// Fires `entries` one after another; a failure only affects its own job.
pub async fn run_jobs(caster: &Caster, entries: &[ScheduleEntry]) -> Vec<Result<()>> {
    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        let result = fire(entry, caster).await;
        if let Err(e) = &result {
            match e {
                CasterError::DiscoveryTimeout { .. } => {
                    warn!("Scheduled {} for {} skipped: {}", entry.action, entry.device, e)
                }
                _ => error!("Scheduled {} for {} failed: {}", entry.action, entry.device, e),
            }
        }
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn entry(device: &str, time: &str, action: Action) -> ScheduleEntry {
        ScheduleEntry {
            device: device.to_string(),
            media: None,
            time: ScheduleEntry::parse_time(time).unwrap(),
            action,
            volume: crate::DEFAULT_VOLUME,
        }
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow() {
        let eight = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert_eq!(next_occurrence(eight, at(1, 7, 59)), at(1, 8, 0));
        assert_eq!(next_occurrence(eight, at(1, 8, 0)), at(2, 8, 0));
        assert_eq!(next_occurrence(eight, at(1, 23, 0)), at(2, 8, 0));
    }

    #[test]
    fn rejects_malformed_times() {
        assert!(ScheduleEntry::parse_time("8:05").is_ok());
        assert!(matches!(ScheduleEntry::parse_time("25:00"), Err(CasterError::Config(_))));
        assert!(matches!(ScheduleEntry::parse_time("noon"), Err(CasterError::Config(_))));
    }

    #[test]
    fn jobs_fire_once_per_day() {
        let mut scheduler = Scheduler::new();
        scheduler.register(entry("TV", "08:00", Action::Start), at(1, 6, 0));

        assert!(scheduler.due(at(1, 7, 59)).is_empty());
        assert_eq!(scheduler.due(at(1, 8, 0)).len(), 1);
        assert!(scheduler.due(at(1, 8, 0)).is_empty());
        assert!(scheduler.due(at(1, 23, 59)).is_empty());
        assert_eq!(scheduler.due(at(2, 8, 0)).len(), 1);
    }

    #[test]
    fn registration_after_time_waits_until_tomorrow() {
        let mut scheduler = Scheduler::new();
        scheduler.register(entry("TV", "08:00", Action::Start), at(1, 9, 0));
        assert!(scheduler.due(at(1, 9, 1)).is_empty());
        assert_eq!(scheduler.due(at(2, 8, 0)).len(), 1);
    }

    #[test]
    fn simultaneous_jobs_keep_registration_order() {
        let mut scheduler = Scheduler::new();
        scheduler.register(entry("TV", "08:05", Action::Stop), at(1, 6, 0));
        scheduler.register(entry("TV", "08:00", Action::Start), at(1, 6, 0));
        scheduler.register(entry("Kitchen", "08:00", Action::Start), at(1, 6, 0));

        let due = scheduler.due(at(1, 8, 10));
        let order: Vec<_> = due.iter().map(|e| (e.device.as_str(), e.action)).collect();
        assert_eq!(
            order,
            vec![("TV", Action::Stop), ("TV", Action::Start), ("Kitchen", Action::Start)]
        );
    }

    #[test]
    fn overlapping_entries_for_one_device_both_fire() {
        let mut scheduler = Scheduler::new();
        scheduler.register(entry("TV", "08:00", Action::Start), at(1, 6, 0));
        scheduler.register(entry("TV", "08:00", Action::Start), at(1, 6, 0));
        assert_eq!(scheduler.due(at(1, 8, 0)).len(), 2);
    }

    #[test]
    fn upcoming_is_sorted_by_next_run() {
        let mut scheduler = Scheduler::new();
        scheduler.register(entry("TV", "07:00", Action::Stop), at(1, 8, 0));
        scheduler.register(entry("TV", "09:00", Action::Start), at(1, 8, 0));
        let upcoming = scheduler.upcoming();
        assert_eq!(upcoming[0].0, at(1, 9, 0));
        assert_eq!(upcoming[1].0, at(2, 7, 0));
        assert_eq!(scheduler.list().len(), 2);
    }

    #[test]
    fn display_matches_log_format() {
        let start = entry("TV", "08:00", Action::Start);
        assert_eq!(
            start.to_string(),
            "[Time=08:00, Action=start, Device=TV, Media=random, Volume=0.003]"
        );
        assert_eq!(
            entry("TV", "08:05", Action::Stop).to_string(),
            "[Time=08:05, Action=stop, Device=TV]"
        );
    }
}
