use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ProgressSample, SelectionSet, TransferFile};
use crate::engine::TransferEngine;
use crate::error::PackError;
use crate::orchestrator::{ProgressSnapshot, TransferOrchestrator};
use crate::retry::Sleeper;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_PEER_REFRESH: Duration = Duration::from_secs(30);
/// Floor for the time between two ticks, so back-to-back ticks cannot divide by ~0.
pub const MIN_TICK_DT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub samples: Vec<ProgressSample>,
    /// Mean of per-file ratios; every file weighs the same.
    pub overall_ratio: f64,
    pub newly_completed: Vec<usize>,
    pub all_done: bool,
    pub peers: usize,
}

#[derive(Debug, Clone)]
struct Tracked {
    global_index: usize,
    size: u64,
    last_bytes: u64,
    ratio: f64,
    completed: bool,
}

/// Turns raw byte counters into ratios, speeds and ETAs for one round.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    tracked: Vec<Tracked>,
    last_tick: Instant,
    finished: bool,
}

impl ProgressAggregator {
    pub fn new(files: &[TransferFile], selection: &SelectionSet, started_at: Instant) -> Self {
        let tracked = selection
            .iter()
            .filter_map(|index| files.get(index))
            .map(|file| Tracked {
                global_index: file.global_index,
                size: file.size,
                last_bytes: 0,
                ratio: 0.0,
                completed: false,
            })
            .collect();
        Self {
            tracked,
            last_tick: started_at,
            finished: false,
        }
    }

    /// Bytes already present in `snapshot` do not count toward the first
    /// tick's speed.
    pub fn with_baseline(mut self, snapshot: &ProgressSnapshot) -> Self {
        for file in &mut self.tracked {
            file.last_bytes = snapshot.get(&file.global_index).copied().unwrap_or(0);
        }
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn tick(&mut self, snapshot: &ProgressSnapshot, now: Instant) -> TickReport {
        let dt = now
            .saturating_duration_since(self.last_tick)
            .max(MIN_TICK_DT)
            .as_secs_f64();
        self.last_tick = now;

        let mut samples = Vec::with_capacity(self.tracked.len());
        let mut newly_completed = Vec::new();
        for file in &mut self.tracked {
            let done = snapshot.get(&file.global_index).copied().unwrap_or(0);
            let raw_ratio = if file.size == 0 {
                0.0
            } else {
                (done as f64 / file.size as f64).min(1.0)
            };
            file.ratio = file.ratio.max(raw_ratio);

            let speed = done.saturating_sub(file.last_bytes) as f64 / dt;
            file.last_bytes = done;
            let eta = (speed > 0.0).then(|| file.size.saturating_sub(done) as f64 / speed);

            if file.ratio >= 1.0 && !file.completed {
                file.completed = true;
                newly_completed.push(file.global_index);
            }

            samples.push(ProgressSample {
                global_index: file.global_index,
                bytes_done: done,
                ratio: file.ratio,
                speed_bytes_per_sec: speed,
                eta_seconds: eta,
            });
        }

        let overall_ratio = if self.tracked.is_empty() {
            0.0
        } else {
            self.tracked.iter().map(|file| file.ratio).sum::<f64>() / self.tracked.len() as f64
        };

        let every_file_done =
            !self.tracked.is_empty() && self.tracked.iter().all(|file| file.ratio >= 1.0);
        let all_done = every_file_done && !self.finished;
        if all_done {
            self.finished = true;
        }

        TickReport {
            samples,
            overall_ratio,
            newly_completed,
            all_done,
            peers: 0,
        }
    }
}

/// Cooperative cancel flag checked once per tick.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait RoundObserver {
    fn on_tick(&mut self, _report: &TickReport) {}
    fn on_file_completed(&mut self, global_index: usize);
    fn on_round_done(&mut self);
    fn on_cancelled(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOptions {
    pub tick_interval: Duration,
    pub peer_refresh: Duration,
}

impl Default for RoundOptions {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            peer_refresh: DEFAULT_PEER_REFRESH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundOutcome {
    Done,
    Cancelled,
}

/// Drives one round on the calling thread: apply priorities, start, then tick
/// until every selected file is complete or `stop` is raised.
pub fn run_round<E: TransferEngine>(
    orchestrator: &mut TransferOrchestrator<E>,
    selection: &SelectionSet,
    options: RoundOptions,
    stop: &StopSignal,
    sleeper: &dyn Sleeper,
    observer: &mut dyn RoundObserver,
) -> Result<RoundOutcome, PackError> {
    if selection.is_empty() {
        return Err(PackError::EmptySelection);
    }

    orchestrator.set_priorities(selection)?;
    orchestrator.start(sleeper);

    let started_at = Instant::now();
    let mut aggregator = ProgressAggregator::new(orchestrator.files(), selection, started_at)
        .with_baseline(&orchestrator.get_progress());
    let mut last_refresh = started_at;
    let mut next_due = started_at;

    loop {
        if stop.is_stopped() {
            orchestrator.pause();
            release_priorities(orchestrator);
            info!("download round cancelled");
            observer.on_cancelled();
            return Ok(RoundOutcome::Cancelled);
        }

        let snapshot = orchestrator.get_progress();
        let now = Instant::now();
        if now.saturating_duration_since(last_refresh) >= options.peer_refresh {
            orchestrator.refresh_peers();
            last_refresh = now;
        }

        let mut report = aggregator.tick(&snapshot, now);
        report.peers = orchestrator.total_peers();
        observer.on_tick(&report);
        for global_index in &report.newly_completed {
            debug!(global_index, "file completed");
            observer.on_file_completed(*global_index);
        }

        if report.all_done {
            release_priorities(orchestrator);
            info!(files = selection.len(), "download round finished");
            observer.on_round_done();
            return Ok(RoundOutcome::Done);
        }

        next_due += options.tick_interval;
        let now = Instant::now();
        if next_due <= now {
            let mut skipped = 0u32;
            while next_due <= now {
                next_due += options.tick_interval;
                skipped += 1;
            }
            debug!(skipped, "tick overran, skipping cycles");
        }
        sleeper.sleep(next_due - now);
    }
}

fn release_priorities<E: TransferEngine>(orchestrator: &mut TransferOrchestrator<E>) {
    if let Err(err) = orchestrator.reset_priorities() {
        warn!(error = %err, "failed to reset priorities after round");
    }
}

pub fn format_bytes(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}

pub fn format_eta(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|secs| secs.is_finite() && *secs <= 86_400.0) else {
        return "∞".to_string();
    };
    if seconds < 0.0 {
        return "---".to_string();
    }
    let total = seconds as u64;
    let (hours, minutes, secs) = (total / 3600, total % 3600 / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
