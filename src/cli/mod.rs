//! CLI argument parsing
//!
//! Command-line front end for binaries that embed a [`Registry`].

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};

use crate::config::{AppConfig, EnvConfig};
use crate::executor::VowsRunner;
use crate::models::Registry;
use crate::output::{write_results_to_file, OutputFormat, ResultFormatter};
use crate::utils::{init_logger, LogLevel};

/// Concurrent context/topic/vow test runner
#[derive(Parser, Debug)]
#[command(name = "vowrun")]
#[command(version)]
#[command(about = "Run context/topic/vow suites concurrently")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the registered suites (default)
    Run(RunArgs),

    /// List planned context and vow ids
    List(FilterArgs),
}

/// Name filters shared by every command
#[derive(clap::Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Exclude contexts or vows whose name matches (regex, repeatable)
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Only run contexts or vows whose dotted id matches (regex, repeatable)
    #[arg(short, long)]
    pub include: Vec<String>,
}

/// Arguments for run command
#[derive(clap::Args, Debug, Default, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Maximum number of concurrently running units
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Let user code print directly instead of capturing output per context
    #[arg(long)]
    pub no_capture: bool,

    /// Save results to file
    #[arg(short, long)]
    pub output: Option<String>,
}

impl FilterArgs {
    fn apply(&self, config: &mut AppConfig) {
        if !self.exclude.is_empty() {
            config.exclude = self.exclude.clone();
        }
        if !self.include.is_empty() {
            config.include = self.include.clone();
        }
    }
}

impl RunArgs {
    /// Overlay command-line flags onto `config`
    pub fn apply(&self, config: &mut AppConfig) {
        self.filter.apply(config);
        if let Some(concurrency) = self.concurrency.filter(|&n| n > 0) {
            config.max_concurrent = concurrency;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.no_capture {
            config.capture_output = false;
        }
    }
}

impl Args {
    /// File config, then `VOWRUN_*` variables, then flags
    pub fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::load_default()?,
        };

        EnvConfig::load().apply(&mut config);

        match &self.command {
            Some(Command::Run(run)) => run.apply(&mut config),
            Some(Command::List(filter)) => filter.apply(&mut config),
            None => {}
        }
        if self.verbose {
            config.log_level = LogLevel::Debug;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse the process arguments and run `registry`
pub fn main(registry: Registry) -> ExitCode {
    run_with_args(registry, Args::parse())
}

/// Run `registry` as described by `args`
pub fn run_with_args(registry: Registry, args: Args) -> ExitCode {
    match execute(registry, args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the run succeeded
fn execute(registry: Registry, args: Args) -> Result<bool> {
    let config = args.resolve_config()?;
    init_logger(config.log_level);
    debug!("Resolved config: {:?}", config);

    let runner = VowsRunner::new(registry).with_config(config);

    if let Some(Command::List(_)) = args.command {
        for id in runner.plan()?.ids() {
            println!("{id}");
        }
        return Ok(true);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    let run = runtime.block_on(runner.run())?;

    let format = runner.config().format;
    println!("{}", ResultFormatter::new(format).format_run(&run)?);

    if let Some(Command::Run(RunArgs {
        output: Some(path), ..
    })) = &args.command
    {
        write_results_to_file(path, &run, format)?;
        info!("Results saved to {}", path);
    }

    Ok(run.successful())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ensure, ContextDef, Topic};

    #[test]
    fn test_run_is_default() {
        let args = Args::parse_from(["vowrun"]);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "vowrun",
            "run",
            "-e",
            "slow",
            "--exclude",
            "flaky",
            "--concurrency",
            "10",
            "--format",
            "json-pretty",
            "--no-capture",
        ]);
        match args.command {
            Some(Command::Run(run)) => {
                assert_eq!(run.filter.exclude, vec!["slow", "flaky"]);
                assert_eq!(run.concurrency, Some(10));
                assert_eq!(run.format, Some(OutputFormat::JsonPretty));
                assert!(run.no_capture);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_list_args() {
        let args = Args::parse_from(["vowrun", "list", "-i", r"Suite\.Fast"]);
        match args.command {
            Some(Command::List(filter)) => assert_eq!(filter.include, vec![r"Suite\.Fast"]),
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let run = RunArgs {
            filter: FilterArgs {
                include: vec!["Only".to_string()],
                ..Default::default()
            },
            concurrency: Some(3),
            no_capture: true,
            ..Default::default()
        };
        let mut config = AppConfig {
            exclude: vec!["from-file".to_string()],
            ..Default::default()
        };
        run.apply(&mut config);

        assert_eq!(config.include, vec!["Only".to_string()]);
        assert_eq!(config.exclude, vec!["from-file".to_string()]);
        assert_eq!(config.max_concurrent, 3);
        assert!(!config.capture_output);
    }

    #[test]
    fn test_execute_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("vowrun.yaml");
        std::fs::write(&config, "format: json\n").unwrap();
        let config = config.to_string_lossy().to_string();

        let registry = |expected: i32| {
            Registry::new().suite(
                "answers",
                vec![ContextDef::new("Answer")
                    .topic(|_| Ok(Topic::value(42_i32)))
                    .vow("matches", move |_, topic| {
                        ensure(topic.equals(&expected), "wrong answer")
                    })],
            )
        };

        let pass = Args::parse_from(["vowrun", "--config", config.as_str()]);
        assert!(execute(registry(42), pass).unwrap());

        let fail = Args::parse_from(["vowrun", "--config", config.as_str()]);
        assert!(!execute(registry(7), fail).unwrap());

        let conflict = Args::parse_from([
            "vowrun", "--config", config.as_str(), "run", "-e", "A", "-i", "B",
        ]);
        assert!(execute(registry(42), conflict).is_err());
    }
}
