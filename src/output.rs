use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{
    AppEvent, EventSink, InstalledResult, MatchResult, PendingResult, SourcesResult,
};
use crate::domain::InstallOutcome;
use crate::install::BatchOutcome;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_matches(results: &[MatchResult]) -> io::Result<()> {
        Self::print_json(&results)
    }

    pub fn print_sources(result: &SourcesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_pending(result: &PendingResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_install(outcome: &InstallOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_batch(outcome: &BatchOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_installed(result: &InstalledResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl EventSink for JsonOutput {
    fn event(&self, event: AppEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => debug!(event = %line, "app event"),
            Err(err) => debug!(error = %err, "unserializable app event"),
        }
    }
}
