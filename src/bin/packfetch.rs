use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use packfetch::app::Workspace;
use packfetch::config::ConfigLoader;
use packfetch::domain::InstallOutcome;
use packfetch::error::PackError;
use packfetch::output::JsonOutput;
use packfetch::progress::format_bytes;

#[derive(Parser)]
#[command(name = "packfetch")]
#[command(about = "Selective content-pack downloader and installer")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    locale: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List transfer descriptors in the source directory")]
    Sources,
    #[command(about = "Resolve file names against the catalog")]
    Match(MatchArgs),
    #[command(about = "List archives waiting in the download directory")]
    Pending,
    #[command(about = "Install one downloaded file")]
    Install(InstallArgs),
    #[command(about = "Install every pending archive")]
    InstallAll,
    #[command(about = "List content installed in the destination")]
    Installed,
}

#[derive(Args)]
struct MatchArgs {
    #[arg(required = true)]
    names: Vec<String>,
}

#[derive(Args)]
struct InstallArgs {
    file: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PackError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PackError) -> u8 {
    match error {
        PackError::NoSourcesFound | PackError::EmptySelection | PackError::UnknownFile(_) => 2,
        PackError::ConfigRead(_) | PackError::CatalogRead(_) => 2,
        PackError::SessionOpenFailed { .. }
        | PackError::TransferFault(_)
        | PackError::ExtractionFailed(_)
        | PackError::UnsupportedArchive(_)
        | PackError::DestinationUnavailable(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(locale) = cli.locale {
        config.locale = locale.trim().to_lowercase();
    }
    let workspace = Workspace::from_config(&config)?;

    match cli.command {
        Commands::Sources => {
            let result = workspace.sources()?;
            if cli.json {
                JsonOutput::print_sources(&result).into_diagnostic()?;
            } else if result.descriptors.is_empty() {
                return Err(PackError::NoSourcesFound.into());
            } else {
                for descriptor in &result.descriptors {
                    println!("{descriptor}");
                }
            }
        }
        Commands::Match(args) => {
            let results: Vec<_> = args
                .names
                .iter()
                .map(|name| workspace.match_name(name))
                .collect();
            if cli.json {
                JsonOutput::print_matches(&results).into_diagnostic()?;
            } else {
                for result in &results {
                    let code = result
                        .identity
                        .as_ref()
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}\t{code}\t{}\t{}",
                        result.filename, result.display_name, result.category_name
                    );
                }
            }
        }
        Commands::Pending => {
            let result = workspace.pending()?;
            if cli.json {
                JsonOutput::print_pending(&result).into_diagnostic()?;
            } else {
                for item in &result.items {
                    println!(
                        "{}\t{}\t{}",
                        item.name,
                        format_bytes(item.size),
                        item.matched_name
                    );
                }
            }
        }
        Commands::Install(args) => {
            let outcome = workspace.install(&args.file);
            if cli.json {
                JsonOutput::print_install(&outcome).into_diagnostic()?;
            } else {
                print_outcome(&outcome);
            }
            if !outcome.success {
                return Err(miette::Report::msg(outcome.message));
            }
        }
        Commands::InstallAll => {
            let outcome = workspace.install_pending()?;
            if cli.json {
                JsonOutput::print_batch(&outcome).into_diagnostic()?;
            } else {
                println!("{}", outcome.message);
            }
            if !outcome.success {
                return Err(miette::Report::msg("some files failed to install"));
            }
        }
        Commands::Installed => {
            let result = workspace.installed()?;
            if cli.json {
                JsonOutput::print_installed(&result).into_diagnostic()?;
            } else {
                for item in &result.items {
                    println!(
                        "{}\t{}\t{}",
                        item.identity, item.display_name, item.category_name
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &InstallOutcome) {
    let status = if outcome.success { "ok" } else { "failed" };
    println!(
        "{status}: {} ({})",
        outcome.source_file.display(),
        outcome.message
    );
    if outcome.success && !outcome.source_removed {
        println!("note: source file left in place");
    }
}
