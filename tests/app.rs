mod common;

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use common::{MockEngine, StoppingSleeper, TransferSleeper};
use packfetch::app::{App, AppEvent, DisplayOrder, EventSink, Workspace};
use packfetch::domain::{Category, InstallState};
use packfetch::error::PackError;
use packfetch::install::InstallationPipeline;
use packfetch::progress::{RoundOptions, RoundOutcome, StopSignal};
use packfetch::retry::{RetryPolicy, Sleeper};
use packfetch::store::Layout;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<AppEvent>>,
}

impl RecordingSink {
    fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                AppEvent::BatchLoaded { .. } => Some("batch-loaded"),
                AppEvent::FileCompleted { .. } => Some("file-completed"),
                AppEvent::InstallOutcome { .. } => Some("install-outcome"),
                AppEvent::RoundDone => Some("round-done"),
                AppEvent::RoundCancelled => Some("round-cancelled"),
                AppEvent::Progress { .. } => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn event(&self, event: AppEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Advances transfers like `TransferSleeper`, then raises `stop` on sleep
/// number `after`.
struct AdvanceThenStop {
    inner: TransferSleeper,
    stop: StopSignal,
    after: usize,
    count: AtomicUsize,
}

impl Sleeper for AdvanceThenStop {
    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        if self.count.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.stop.stop();
        }
    }
}

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

fn workspace(root: &Path, destination: bool) -> Workspace {
    let layout = Layout::new_with_paths(
        utf8(&root.join("source")),
        utf8(&root.join("downloads")),
        utf8(&root.join("scratch")),
        destination.then(|| utf8(&root.join("Delta"))),
    );
    layout.ensure_working_dirs().unwrap();
    let pipeline = InstallationPipeline::new(root.join("scratch"))
        .with_delete_policy(RetryPolicy::none());
    Workspace::new(common::catalog_store("en"), layout, pipeline)
}

fn engine() -> MockEngine {
    MockEngine::default()
        .with_session(
            "a.torrent",
            "Bundle A",
            &[("packs/EP05_Seasons.zip", 100), ("packs/readme.txt", 10)],
        )
        .with_session("b.torrent", "Bundle B", &[("GP03_Dine_Out.zip", 60)])
}

fn app(root: &Path, engine: MockEngine) -> App<MockEngine> {
    common::touch(&root.join("source").join("a.torrent"));
    common::touch(&root.join("source").join("b.torrent"));
    let downloads = root.join("downloads");
    common::write_zip(
        &downloads.join("packs").join("EP05_Seasons.zip"),
        &[
            ("EP05/ClientFullBuild0.package", b"c"),
            ("EP05/SimulationFullBuild0.package", b"s"),
        ],
    );
    common::write_zip(
        &downloads.join("GP03_Dine_Out.zip"),
        &[("GP03/ClientFullBuild0.package", b"c")],
    );
    App::new(workspace(root, true), engine, RoundOptions::default())
        .with_warmup(Duration::from_millis(100))
}

#[test]
fn full_round_downloads_and_installs_selection() {
    let temp = tempfile::tempdir().unwrap();
    let engine = engine();
    let sleeper = TransferSleeper::new(&engine, 25);
    let mut app = app(temp.path(), engine).with_sleeper(sleeper);
    let sink = RecordingSink::default();

    assert!(app.load_batch(&sink).unwrap());
    assert!(app.select(0).unwrap());
    assert!(app.select(2).unwrap());

    let outcome = app.run_round(&StopSignal::new(), &sink).unwrap();

    assert_eq!(outcome, RoundOutcome::Done);
    assert_eq!(app.install_state(0), Some(InstallState::Installed));
    assert_eq!(app.install_state(1), Some(InstallState::Pending));
    assert_eq!(app.install_state(2), Some(InstallState::Installed));
    let delta = temp.path().join("Delta");
    assert!(delta.join("EP05").join("SimulationFullBuild0.package").is_file());
    assert!(delta.join("GP03").join("ClientFullBuild0.package").is_file());
    assert!(!temp.path().join("downloads").join("GP03_Dine_Out.zip").exists());
    assert!(app.selection().is_empty());
    assert!(!app.selection().is_frozen());

    let names = sink.names();
    assert_eq!(names.first(), Some(&"batch-loaded"));
    assert_eq!(names.last(), Some(&"round-done"));
    assert_eq!(names.iter().filter(|name| **name == "install-outcome").count(), 2);

    let installed = app.workspace().installed().unwrap();
    let codes: Vec<_> = installed.items.iter().map(|item| item.identity.as_str()).collect();
    assert_eq!(codes, vec!["EP05", "GP03"]);
    assert_eq!(installed.items[0].display_name, "Seasons");
    assert_eq!(installed.items[0].category_name, "Expansion Packs");
}

#[test]
fn installed_file_is_not_selected_again() {
    let temp = tempfile::tempdir().unwrap();
    let engine = engine();
    let sleeper = TransferSleeper::new(&engine, 60);
    let mut app = app(temp.path(), engine).with_sleeper(sleeper);
    let sink = RecordingSink::default();
    app.load_batch(&sink).unwrap();
    assert!(app.select(2).unwrap());
    assert_eq!(app.run_round(&StopSignal::new(), &sink).unwrap(), RoundOutcome::Done);
    assert_eq!(app.install_state(2), Some(InstallState::Installed));

    assert!(!app.select(2).unwrap());
    let second = RecordingSink::default();
    assert_matches!(
        app.run_round(&StopSignal::new(), &second),
        Err(PackError::EmptySelection)
    );
    assert!(second.names().is_empty());
    assert_eq!(app.install_state(2), Some(InstallState::Installed));
    assert!(app.outcome(2).unwrap().success);
}

#[test]
fn resumed_round_skips_files_installed_before_cancel() {
    let temp = tempfile::tempdir().unwrap();
    let engine = engine();
    let stop = StopSignal::new();
    let sleeper = AdvanceThenStop {
        inner: TransferSleeper::new(&engine, 60),
        stop: stop.clone(),
        after: 2,
        count: AtomicUsize::new(0),
    };
    let mut app = app(temp.path(), engine).with_sleeper(sleeper);
    let sink = RecordingSink::default();
    app.load_batch(&sink).unwrap();
    app.select(0).unwrap();
    app.select(2).unwrap();

    assert_eq!(app.run_round(&stop, &sink).unwrap(), RoundOutcome::Cancelled);
    assert_eq!(app.install_state(0), Some(InstallState::Cancelled));
    assert_eq!(app.install_state(2), Some(InstallState::Installed));
    assert!(app.selection().contains(2));

    stop.reset();
    let sleeper = TransferSleeper::new(app.orchestrator().engine(), 60);
    let mut app = app.with_sleeper(sleeper);
    let second = RecordingSink::default();
    assert_eq!(app.run_round(&stop, &second).unwrap(), RoundOutcome::Done);

    assert_eq!(app.install_state(0), Some(InstallState::Installed));
    assert_eq!(app.install_state(2), Some(InstallState::Installed));
    assert!(app.outcome(2).unwrap().success);
    let outcomes: Vec<usize> = second
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            AppEvent::InstallOutcome { global_index, .. } => Some(*global_index),
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec![0]);
    assert_eq!(second.names().last(), Some(&"round-done"));
}

#[test]
fn cancelled_round_keeps_selection_and_marks_files() {
    let temp = tempfile::tempdir().unwrap();
    let stop = StopSignal::new();
    let sleeper = StoppingSleeper {
        stop: stop.clone(),
        after: 2,
        count: AtomicUsize::new(0),
    };
    let mut app = app(temp.path(), engine()).with_sleeper(sleeper);
    let sink = RecordingSink::default();
    app.load_batch(&sink).unwrap();
    app.select(0).unwrap();

    let outcome = app.run_round(&stop, &sink).unwrap();

    assert_eq!(outcome, RoundOutcome::Cancelled);
    assert_eq!(app.install_state(0), Some(InstallState::Cancelled));
    assert!(app.selection().contains(0));
    assert!(!app.selection().is_frozen());
    assert_eq!(sink.names().last(), Some(&"round-cancelled"));
    assert!(!temp.path().join("Delta").join("EP05").exists());
}

#[test]
fn missing_destination_fails_install_not_round() {
    let temp = tempfile::tempdir().unwrap();
    let engine = engine();
    let sleeper = TransferSleeper::new(&engine, 100);
    common::touch(&temp.path().join("source").join("b.torrent"));
    common::write_zip(
        &temp.path().join("downloads").join("GP03_Dine_Out.zip"),
        &[("GP03/a.package", b"x")],
    );
    let mut app = App::new(workspace(temp.path(), false), engine, RoundOptions::default())
        .with_warmup(Duration::from_millis(100))
        .with_sleeper(sleeper);
    let sink = RecordingSink::default();
    app.load_batch(&sink).unwrap();
    app.select(0).unwrap();

    assert_eq!(app.run_round(&StopSignal::new(), &sink).unwrap(), RoundOutcome::Done);
    assert_eq!(app.install_state(0), Some(InstallState::InstallFailed));
    let outcome = app.outcome(0).unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.contains("no destination configured"));
}

#[test]
fn selection_requires_loaded_files() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = app(temp.path(), engine());
    let sink = RecordingSink::default();
    assert_matches!(app.select(0), Err(PackError::UnknownFile(0)));
    assert_matches!(
        app.run_round(&StopSignal::new(), &sink),
        Err(PackError::EmptySelection)
    );

    app.load_batch(&sink).unwrap();
    assert_matches!(app.select(3), Err(PackError::UnknownFile(3)));
    assert!(app.select(1).unwrap());
    assert!(app.deselect(1).unwrap());
    assert!(app.selection().is_empty());
}

#[test]
fn file_views_follow_locale_and_order() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = app(temp.path(), engine());
    let sink = RecordingSink::default();
    app.load_batch(&sink).unwrap();
    app.select(2).unwrap();

    let views = app.file_views(DisplayOrder::ActiveFirst);
    let names: Vec<_> = views.iter().map(|view| view.name.as_str()).collect();
    assert_eq!(names, vec!["GP03_Dine_Out.zip", "EP05_Seasons.zip", "readme.txt"]);
    assert!(views[0].selected);
    assert_eq!(views[1].matched_name, "Seasons");
    assert_eq!(views[1].category, Category::Code("EP".to_string()));
    assert_eq!(views[2].matched_name, "Unknown");
    assert_eq!(views[2].category, Category::Other);

    assert!(app.set_locale("de"));
    let views = app.file_views(DisplayOrder::Name);
    let names: Vec<_> = views.iter().map(|view| view.name.as_str()).collect();
    assert_eq!(names, vec!["EP05_Seasons.zip", "GP03_Dine_Out.zip", "readme.txt"]);
    assert_eq!(views[0].matched_name, "Jahreszeiten");
    assert_eq!(views[0].category_name, "Erweiterungspacks");
    assert_eq!(views[2].matched_name, "Unbekannt");
}

#[test]
fn workspace_install_pending_and_listing() {
    let temp = tempfile::tempdir().unwrap();
    let workspace = workspace(temp.path(), true);
    let downloads = temp.path().join("downloads");
    common::write_zip(&downloads.join("SP18_spooky.zip"), &[("SP18/x.package", b"x")]);
    fs::write(downloads.join("notes.txt"), b"ignored").unwrap();

    let pending = workspace.pending().unwrap();
    assert_eq!(pending.items.len(), 1);
    assert_eq!(pending.items[0].matched_name, "Spooky Stuff");

    let batch = workspace.install_pending().unwrap();
    assert!(batch.success);
    assert_eq!(batch.message, "OK: 1/1");
    assert!(workspace.pending().unwrap().items.is_empty());

    let matched = workspace.match_name("sp18_spooky.zip");
    assert_eq!(matched.identity.map(|id| id.to_string()), Some("SP18".to_string()));
    assert_eq!(matched.category_name, "SP");
}

#[test]
fn workspace_without_destination() {
    let temp = tempfile::tempdir().unwrap();
    let workspace = workspace(temp.path(), false);
    assert_matches!(
        workspace.install_pending(),
        Err(PackError::DestinationUnavailable(_))
    );
    assert_matches!(
        workspace.installed(),
        Err(PackError::DestinationUnavailable(_))
    );
}
