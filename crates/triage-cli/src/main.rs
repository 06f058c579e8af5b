//! Triage CLI binary entrypoint.
//!
//! This is the main entry point for the `triage` command-line tool.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use triage_cli::cli::{Cli, Commands};
use triage_cli::commands::{GroupCommand, IngestCommand, InitConfigCommand, StatsCommand};
use triage_cli::output::OutputFormat;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("triage=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Ingest(args) => {
            IngestCommand::new(&args)
                .execute(&mut stdout, &format)
                .await
                .with_context(|| format!("ingesting '{}'", args.file.display()))?;
        }
        Commands::Groups(args) => {
            GroupCommand::new(&args.state.state).list(&mut stdout, &format, &args)?;
        }
        Commands::Group { id, state } => {
            GroupCommand::new(&state.state).show(&mut stdout, &format, &id)?;
        }
        Commands::Resolve { id, notes, state } => {
            GroupCommand::new(&state.state)
                .resolve(&mut stdout, &format, &id, notes)
                .await
                .with_context(|| format!("resolving group {id}"))?;
        }
        Commands::Merge {
            target,
            sources,
            state,
        } => {
            GroupCommand::new(&state.state)
                .merge(&mut stdout, &format, &target, &sources)
                .await
                .with_context(|| format!("merging into group {target}"))?;
        }
        Commands::Stats { state } => {
            StatsCommand::new(&state.state).execute(&mut stdout, &format)?;
        }
        Commands::InitConfig { output } => {
            InitConfigCommand::new(output.as_deref()).execute(&mut stdout)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_cli::cli::Format;

    #[test]
    fn cli_parses_stats() {
        let cli = Cli::parse_from(["triage", "stats", "--state", "/tmp/triage"]);
        assert!(matches!(cli.command, Commands::Stats { .. }));
    }

    #[test]
    fn cli_respects_format_flag() {
        let cli = Cli::parse_from(["triage", "--format", "json", "init-config"]);
        assert_eq!(cli.format, Format::Json);
    }

    #[tokio::test]
    async fn run_stats_on_empty_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = dir.path().to_string_lossy().into_owned();
        let cli = Cli::parse_from(["triage", "stats", "--state", state.as_str()]);
        assert!(run(cli).await.is_ok());
    }

    #[tokio::test]
    async fn run_group_missing_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = dir.path().to_string_lossy().into_owned();
        let cli = Cli::parse_from(["triage", "group", "nope", "--state", state.as_str()]);
        let err = run(cli).await.unwrap_err();
        assert_eq!(err.to_string(), "group not found: nope");
    }

    #[tokio::test]
    async fn run_ingest_missing_file_fails_with_context() {
        let cli = Cli::parse_from(["triage", "ingest", "/nonexistent/alerts.json"]);
        let err = run(cli).await.unwrap_err();
        assert!(err.to_string().starts_with("ingesting '/nonexistent/alerts.json'"));
    }
}
