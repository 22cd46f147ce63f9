use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogStore};
use crate::config::ResolvedConfig;
use crate::domain::{
    Category, Identity, InstallOutcome, InstallState, ProgressSample, SelectionSet,
};
use crate::engine::TransferEngine;
use crate::error::PackError;
use crate::install::{self, BatchOutcome, InstallationPipeline};
use crate::matcher::CatalogMatcher;
use crate::orchestrator::{self, TransferOrchestrator};
use crate::progress::{self, RoundObserver, RoundOptions, RoundOutcome, StopSignal, TickReport};
use crate::retry::{Sleeper, ThreadSleeper};
use crate::store::Layout;

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub filename: String,
    pub identity: Option<Identity>,
    pub display_name: String,
    pub category: Category,
    pub category_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourcesResult {
    pub source_dir: String,
    pub descriptors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingResult {
    pub download_dir: String,
    pub items: Vec<PendingItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingItem {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub matched_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledResult {
    pub destination: String,
    pub items: Vec<InstalledEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledEntry {
    pub identity: Identity,
    pub display_name: String,
    pub category: Category,
    pub category_name: String,
}

/// Per-file record handed to a presentation layer. Names are projected from
/// the identity and the active locale at read time.
#[derive(Debug, Clone, Serialize)]
pub struct FileView {
    pub global_index: usize,
    pub name: String,
    pub size: u64,
    pub matched_name: String,
    pub category: Category,
    pub category_name: String,
    pub ratio: f64,
    pub speed: f64,
    pub eta: Option<f64>,
    pub selected: bool,
    pub install_state: InstallState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayOrder {
    Name,
    /// Selected files and files with any progress first, then by name.
    #[default]
    ActiveFirst,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AppEvent {
    BatchLoaded {
        name: Option<String>,
        files: usize,
    },
    Progress {
        overall_ratio: f64,
        peers: usize,
    },
    FileCompleted {
        global_index: usize,
    },
    RoundDone,
    RoundCancelled,
    InstallOutcome {
        global_index: usize,
        outcome: InstallOutcome,
    },
}

pub trait EventSink {
    fn event(&self, event: AppEvent);
}

/// Everything that works without a transfer engine: catalog, matching, and
/// installs into the configured layout.
pub struct Workspace {
    catalog: Arc<CatalogStore>,
    matcher: CatalogMatcher,
    pipeline: InstallationPipeline,
    layout: Layout,
}

impl Workspace {
    pub fn new(catalog: Arc<CatalogStore>, layout: Layout, pipeline: InstallationPipeline) -> Self {
        Self {
            matcher: CatalogMatcher::new(Arc::clone(&catalog)),
            catalog,
            pipeline,
            layout,
        }
    }

    /// A missing catalog file leaves every file unknown rather than failing.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, PackError> {
        let catalog_path = config.catalog.as_std_path();
        let catalog = if catalog_path.exists() {
            Catalog::read(catalog_path)?
        } else {
            warn!(path = %config.catalog, "catalog not found, names will be unknown");
            Catalog::default()
        };
        let layout = Layout::from_config(config);
        let pipeline = InstallationPipeline::new(layout.scratch_dir().as_std_path());
        Ok(Self::new(
            Arc::new(CatalogStore::new(catalog, &config.locale)),
            layout,
            pipeline,
        ))
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    pub fn matcher(&self) -> &CatalogMatcher {
        &self.matcher
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn pipeline(&self) -> &InstallationPipeline {
        &self.pipeline
    }

    pub fn set_locale(&self, locale: &str) -> bool {
        self.catalog.set_locale(locale)
    }

    pub fn match_name(&self, filename: &str) -> MatchResult {
        let outcome = self.matcher.match_file(filename);
        MatchResult {
            filename: filename.to_string(),
            category_name: self.catalog.category_name(&outcome.category),
            identity: outcome.identity,
            display_name: outcome.display_name,
            category: outcome.category,
        }
    }

    pub fn sources(&self) -> Result<SourcesResult, PackError> {
        let descriptors = orchestrator::discover_sources(self.layout.source_dir().as_std_path())?;
        Ok(SourcesResult {
            source_dir: self.layout.source_dir().to_string(),
            descriptors: descriptors
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
        })
    }

    pub fn pending(&self) -> Result<PendingResult, PackError> {
        let items = install::pending_items(self.layout.download_dir().as_std_path())?
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                PendingItem {
                    size: fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0),
                    matched_name: self.matcher.match_file(&name).display_name,
                    path: path.display().to_string(),
                    name,
                }
            })
            .collect();
        Ok(PendingResult {
            download_dir: self.layout.download_dir().to_string(),
            items,
        })
    }

    pub fn install(&self, source: &Path) -> InstallOutcome {
        match self.layout.destination() {
            Ok(destination) => self.pipeline.install(source, destination.as_std_path()),
            Err(err) => InstallOutcome::failed(source.to_path_buf(), err.to_string()),
        }
    }

    /// Installs every archive waiting in the download directory.
    pub fn install_pending(&self) -> Result<BatchOutcome, PackError> {
        let destination = self.layout.destination()?;
        let sources = install::pending_items(self.layout.download_dir().as_std_path())?;
        let outcome = self
            .pipeline
            .install_batch(&sources, destination.as_std_path());
        info!(installed = outcome.installed, total = sources.len(), "batch install finished");
        Ok(outcome)
    }

    pub fn installed(&self) -> Result<InstalledResult, PackError> {
        let destination = self.layout.destination()?;
        let items = install::installed_identities(destination.as_std_path())?
            .into_iter()
            .map(|identity| {
                let category = identity.category();
                InstalledEntry {
                    display_name: self.catalog.display_name(&identity),
                    category_name: self.catalog.category_name(&category),
                    category,
                    identity,
                }
            })
            .collect();
        Ok(InstalledResult {
            destination: destination.to_string(),
            items,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct FileState {
    install_state: InstallState,
    sample: Option<ProgressSample>,
    outcome: Option<InstallOutcome>,
}

/// Single owner of one run: workspace, orchestrator, selection and per-file
/// state keyed by global index.
pub struct App<E: TransferEngine> {
    workspace: Workspace,
    orchestrator: TransferOrchestrator<E>,
    options: RoundOptions,
    sleeper: Box<dyn Sleeper>,
    selection: SelectionSet,
    files: Vec<FileState>,
}

impl<E: TransferEngine> App<E> {
    pub fn new(workspace: Workspace, engine: E, options: RoundOptions) -> Self {
        let download_dir = workspace.layout().download_dir().as_std_path().to_path_buf();
        Self {
            orchestrator: TransferOrchestrator::new(engine, download_dir),
            workspace,
            options,
            sleeper: Box::new(ThreadSleeper),
            selection: SelectionSet::new(),
            files: Vec::new(),
        }
    }

    pub fn from_config(config: &ResolvedConfig, engine: E) -> Result<Self, PackError> {
        let workspace = Workspace::from_config(config)?;
        Ok(Self::new(workspace, engine, config.round_options()).with_warmup(config.warmup))
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.orchestrator = self.orchestrator.with_warmup(warmup);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn orchestrator(&self) -> &TransferOrchestrator<E> {
        &self.orchestrator
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Loads every descriptor found in the source directory.
    pub fn load_batch(&mut self, sink: &dyn EventSink) -> Result<bool, PackError> {
        let descriptors =
            orchestrator::discover_sources(self.workspace.layout().source_dir().as_std_path())?;
        self.load_descriptors(&descriptors, sink)
    }

    pub fn load_descriptors(
        &mut self,
        descriptors: &[PathBuf],
        sink: &dyn EventSink,
    ) -> Result<bool, PackError> {
        self.selection = SelectionSet::new();
        self.files.clear();
        let loaded = self
            .orchestrator
            .load_sessions(descriptors, &self.workspace.matcher)?;
        self.files = vec![FileState::default(); self.orchestrator.files().len()];
        if loaded {
            sink.event(AppEvent::BatchLoaded {
                name: self.orchestrator.batch_name().map(str::to_string),
                files: self.files.len(),
            });
        }
        Ok(loaded)
    }

    /// Returns false when a round is running and the selection is frozen, or
    /// when the file already reached `Installed` or `InstallFailed`.
    pub fn select(&mut self, global_index: usize) -> Result<bool, PackError> {
        self.check_index(global_index)?;
        let state = self.files[global_index].install_state;
        if state.is_terminal() {
            debug!(global_index, ?state, "file already settled, not selecting");
            return Ok(false);
        }
        Ok(self.selection.insert(global_index))
    }

    pub fn deselect(&mut self, global_index: usize) -> Result<bool, PackError> {
        self.check_index(global_index)?;
        Ok(self.selection.remove(global_index))
    }

    fn check_index(&self, global_index: usize) -> Result<(), PackError> {
        if global_index >= self.files.len() {
            return Err(PackError::UnknownFile(global_index));
        }
        Ok(())
    }

    pub fn set_locale(&self, locale: &str) -> bool {
        self.workspace.set_locale(locale)
    }

    pub fn install_state(&self, global_index: usize) -> Option<InstallState> {
        self.files.get(global_index).map(|state| state.install_state)
    }

    pub fn outcome(&self, global_index: usize) -> Option<&InstallOutcome> {
        self.files
            .get(global_index)
            .and_then(|state| state.outcome.as_ref())
    }

    pub fn file_views(&self, order: DisplayOrder) -> Vec<FileView> {
        let view = self.workspace.catalog().snapshot();
        let unknown = view.catalog.unknown_name(&view.locale);
        let mut views: Vec<FileView> = self
            .orchestrator
            .files()
            .iter()
            .zip(&self.files)
            .map(|(file, state)| {
                let category = file
                    .identity
                    .as_ref()
                    .map(Identity::category)
                    .unwrap_or(Category::Other);
                let sample = state.sample.as_ref();
                FileView {
                    global_index: file.global_index,
                    name: file.name.clone(),
                    size: file.size,
                    matched_name: file
                        .identity
                        .as_ref()
                        .map(|id| view.catalog.display_name(id, &view.locale))
                        .unwrap_or_else(|| unknown.clone()),
                    category_name: view.catalog.category_name(&category, &view.locale),
                    category,
                    ratio: sample.map(|sample| sample.ratio).unwrap_or(0.0),
                    speed: sample.map(|sample| sample.speed_bytes_per_sec).unwrap_or(0.0),
                    eta: sample.and_then(|sample| sample.eta_seconds),
                    selected: self.selection.contains(file.global_index),
                    install_state: state.install_state,
                }
            })
            .collect();

        match order {
            DisplayOrder::Name => views.sort_by_key(|view| view.name.to_lowercase()),
            DisplayOrder::ActiveFirst => views.sort_by_key(|view| {
                let touched = view.selected
                    || view.ratio > 0.0
                    || view.install_state != InstallState::Pending;
                (!touched, view.name.to_lowercase())
            }),
        }
        views
    }

    /// Runs one download round over the current selection on this thread,
    /// installing each file as it completes.
    pub fn run_round(
        &mut self,
        stop: &StopSignal,
        sink: &dyn EventSink,
    ) -> Result<RoundOutcome, PackError> {
        let settled: Vec<usize> = self
            .selection
            .iter()
            .filter(|index| self.files[*index].install_state.is_terminal())
            .collect();
        for index in settled {
            self.selection.remove(index);
        }
        if self.selection.is_empty() {
            return Err(PackError::EmptySelection);
        }

        for index in self.selection.iter() {
            let state = &mut self.files[index].install_state;
            if let Some(next) = state.advance(InstallState::Downloading) {
                *state = next;
            }
        }
        self.selection.freeze();

        let paths: Vec<PathBuf> = self
            .orchestrator
            .files()
            .iter()
            .map(|file| self.orchestrator.local_path(file))
            .collect();
        let mut driver = RoundDriver {
            workspace: &self.workspace,
            paths,
            files: &mut self.files,
            sink,
        };
        let result = progress::run_round(
            &mut self.orchestrator,
            &self.selection,
            self.options,
            stop,
            self.sleeper.as_ref(),
            &mut driver,
        );

        self.selection.thaw();
        match &result {
            Ok(RoundOutcome::Done) => {
                self.selection.clear();
            }
            Ok(RoundOutcome::Cancelled) => {}
            Err(err) => {
                warn!(error = %err, "download round aborted");
                cancel_downloading(&mut self.files);
            }
        }
        result
    }

    pub fn shutdown(&mut self) {
        self.orchestrator.stop();
        self.orchestrator.remove();
        self.files.clear();
        self.selection = SelectionSet::new();
    }
}

fn cancel_downloading(files: &mut [FileState]) {
    for state in files {
        if let Some(next) = state.install_state.advance(InstallState::Cancelled) {
            state.install_state = next;
        }
    }
}

struct RoundDriver<'a> {
    workspace: &'a Workspace,
    paths: Vec<PathBuf>,
    files: &'a mut [FileState],
    sink: &'a dyn EventSink,
}

impl RoundDriver<'_> {
    fn transition(&mut self, global_index: usize, next: InstallState) -> bool {
        let state = &mut self.files[global_index].install_state;
        let current = *state;
        match current.advance(next) {
            Some(advanced) => {
                *state = advanced;
                true
            }
            None => {
                warn!(global_index, from = ?current, to = ?next, "ignored state change");
                false
            }
        }
    }
}

impl RoundObserver for RoundDriver<'_> {
    fn on_tick(&mut self, report: &TickReport) {
        for sample in &report.samples {
            if let Some(state) = self.files.get_mut(sample.global_index) {
                state.sample = Some(sample.clone());
            }
        }
        self.sink.event(AppEvent::Progress {
            overall_ratio: report.overall_ratio,
            peers: report.peers,
        });
    }

    fn on_file_completed(&mut self, global_index: usize) {
        if !self.transition(global_index, InstallState::Completed) {
            return;
        }
        self.sink.event(AppEvent::FileCompleted { global_index });

        if !self.transition(global_index, InstallState::Installing) {
            return;
        }
        let outcome = self.workspace.install(&self.paths[global_index]);
        let next = if outcome.success {
            InstallState::Installed
        } else {
            InstallState::InstallFailed
        };
        self.transition(global_index, next);
        self.files[global_index].outcome = Some(outcome.clone());
        self.sink.event(AppEvent::InstallOutcome {
            global_index,
            outcome,
        });
    }

    fn on_round_done(&mut self) {
        self.sink.event(AppEvent::RoundDone);
    }

    fn on_cancelled(&mut self) {
        cancel_downloading(self.files);
        self.sink.event(AppEvent::RoundCancelled);
    }
}
