use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use taskrelay::config::Config;
use taskrelay::dispatch::queue::RequestQueue;
use taskrelay::dispatch::retry::RetryPolicy;
use taskrelay::orchestrator::Orchestrator;
use taskrelay::tasks::pipeline::{ExtractionSettings, TaskExtractor};
use taskrelay::tasks::prompt::DocumentOptions;

/// taskrelay - turn a requirements document into a validated task list
#[derive(Debug, Parser)]
#[command(name = "taskrelay")]
#[command(about = "Break a requirements document into task records using the configured providers")]
#[command(version)]
struct Cli {
    /// Requirements document to read ("-" or omitted reads stdin)
    input: Option<PathBuf>,

    /// Approximate number of tasks to ask for
    #[arg(short = 'n', long)]
    num_tasks: Option<usize>,
}

impl Cli {
    /// `None` means stdin.
    fn input_path(&self) -> Option<&Path> {
        self.input.as_deref().filter(|p| *p != Path::new("-"))
    }
}

fn read_document(input: Option<&Path>) -> anyhow::Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // .env next to the binary first, then the usual CWD search.
    match std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
    {
        Some(path) if path.exists() => {
            dotenvy::from_path(&path).ok();
        }
        _ => {
            dotenvy::dotenv().ok();
        }
    }

    let cli = Cli::parse();
    let document = read_document(cli.input_path())?;

    let config = Config::load()?;
    tracing::info!(
        providers = ?config.configured_providers(),
        max_concurrent = config.max_concurrent,
        "taskrelay starting"
    );

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    let queue = RequestQueue::new(orchestrator, config.max_concurrent);
    let extractor = TaskExtractor::with_settings(
        queue,
        ExtractionSettings {
            retry: RetryPolicy::new(config.max_retries),
            ..Default::default()
        },
    );

    let options = DocumentOptions {
        num_tasks: cli.num_tasks,
    };
    let records = match extractor.extract_from_document(&document, &options).await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!(error = %e, provider = ?e.provider(), "task extraction failed");
            anyhow::bail!(e.user_message());
        }
    };

    println!("{}", serde_json::to_string_pretty(&records)?);
    tracing::info!(records = records.len(), "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn file_and_task_count_parse() {
        let cli = Cli::try_parse_from(["taskrelay", "-n", "12", "prd.md"]).unwrap();
        assert_eq!(cli.num_tasks, Some(12));
        assert_eq!(cli.input_path(), Some(Path::new("prd.md")));
    }

    #[test]
    fn dash_and_missing_input_read_stdin() {
        let dash = Cli::try_parse_from(["taskrelay", "-"]).unwrap();
        assert_eq!(dash.input_path(), None);
        let none = Cli::try_parse_from(["taskrelay", "--num-tasks", "3"]).unwrap();
        assert_eq!(none.input_path(), None);
    }

    #[test]
    fn bad_task_count_and_unknown_flags_are_rejected() {
        assert!(Cli::try_parse_from(["taskrelay", "--num-tasks", "many"]).is_err());
        assert!(Cli::try_parse_from(["taskrelay", "--verbose-ish"]).is_err());
    }
}
