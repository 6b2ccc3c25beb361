//! Command-line front end for simrun.
//!
//! Launches an app in the iOS Simulator, streams its log output, and exits
//! with a code describing how the session ended.
//!
//! # Usage
//!
//! ```bash
//! # Launch and stream logs until the app exits
//! simrun launch build/Demo.app --sdk 17.0
//!
//! # Run a test build: hidden simulator, finish on the auto-exit marker,
//! # give up after 60s without output
//! simrun launch build/DemoTests.app --sdk 17.0 --auto-exit --unit-test -t 60000
//!
//! # Machine-readable outcome (test results included)
//! simrun -f json launch build/DemoTests.app --sdk 17.0 --unit-test
//!
//! # Stop any running simulator
//! simrun stop
//!
//! # Show the resolved configuration
//! simrun config
//! ```
//!
//! # Exit codes
//!
//! | code | outcome |
//! |------|---------|
//! | 0 | success |
//! | 1 | launcher exited non-zero or was killed by a signal |
//! | 2 | app crashed |
//! | 3 | timed out |
//! | 4 | launcher could not be started or observed |
//! | 5 | output could not be written |

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use simrun_core::session::DeviceFamily;
use simrun_core::toolchain::Toolchain;
use simrun_core::{launch, LaunchError, LaunchOutcome, LaunchRequest, SimrunConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Launch apps in the iOS Simulator and report how they ended.
#[derive(Parser)]
#[command(name = "simrun")]
#[command(about = "Launch an app in the iOS Simulator and report a single outcome")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Suppress forwarded log lines
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Launch an app and wait for it to finish
    Launch {
        /// Path to the .app bundle
        app: PathBuf,
        /// Simulator SDK version (e.g. 17.0)
        #[arg(long, env = "SIMRUN_SDK")]
        sdk: String,
        /// Launcher executable (defaults to the configured one, then ios-sim on PATH)
        #[arg(long, env = "SIMRUN_LAUNCHER")]
        launcher: Option<PathBuf>,
        /// Toolchain developer directory exported to the launcher
        #[arg(long, env = "DEVELOPER_DIR")]
        developer_dir: Option<PathBuf>,
        /// Device family: iphone or ipad
        #[arg(long)]
        family: Option<DeviceFamily>,
        /// Use a retina device
        #[arg(long)]
        retina: bool,
        /// Hide the simulator window (default: on with --auto-exit)
        #[arg(long, conflicts_with = "show")]
        hide: bool,
        /// Show the simulator window even with --auto-exit
        #[arg(long)]
        show: bool,
        /// Finish when the app prints the auto-exit marker
        #[arg(long)]
        auto_exit: bool,
        /// Capture the structured test-result block
        #[arg(long)]
        unit_test: bool,
        /// Inactivity timeout in milliseconds
        #[arg(short, long, env = "SIMRUN_TIMEOUT")]
        timeout: Option<u64>,
        /// Environment variable for the app (KEY=VALUE), repeatable
        #[arg(short = 'e', long = "setenv", value_parser = parse_key_value)]
        app_env: Vec<(String, String)>,
        /// Arguments passed to the app
        #[arg(last = true)]
        app_args: Vec<String>,
    },

    /// Stop any running simulator
    Stop,

    /// Show the resolved configuration
    Config,
}

#[derive(Debug)]
enum CliError {
    Launch(LaunchError),
    Output(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Launch(_) => ExitCode::from(4),
            CliError::Output(_) => ExitCode::from(5),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Launch(e) => write!(f, "{}", e),
            CliError::Output(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

impl From<LaunchError> for CliError {
    fn from(e: LaunchError) -> Self {
        CliError::Launch(e)
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Command::Launch {
            app,
            sdk,
            launcher,
            developer_dir,
            family,
            retina,
            hide,
            show,
            auto_exit,
            unit_test,
            timeout,
            app_env,
            app_args,
        } => {
            let toolchains = developer_dir
                .map(|dir| Toolchain {
                    version: String::new(),
                    developer_dir: dir,
                    selected: true,
                })
                .into_iter()
                .collect();
            let env = SimrunConfig::load().environment(launcher, toolchains)?;
            debug!(launcher = %env.launcher.display(), "resolved launcher");

            let mut request = LaunchRequest::new(app, sdk)
                .auto_exit(auto_exit)
                .unit_test_mode(unit_test)
                .retina(retina);
            if show {
                request = request.hide(false);
            } else if hide {
                request = request.hide(true);
            }
            if let Some(family) = family {
                request = request.family(family);
            }
            if let Some(timeout) = timeout {
                request = request.timeout_ms(timeout);
            }
            request.app_env = app_env;
            request.app_args = app_args;

            let mut handle = launch(request, env).await?;
            while let Some(line) = handle.lines.recv().await {
                if cli.quiet {
                    continue;
                }
                if cli.format == OutputFormat::Json {
                    let json = serde_json::to_string(&line)
                        .map_err(|e| CliError::Output(e.to_string()))?;
                    eprintln!("{}", json);
                } else {
                    eprintln!("[{}] {}", line.channel, line.text);
                }
            }

            let outcome = handle.outcome().await;
            print_outcome(&outcome, cli.format)?;
            Ok(ExitCode::from(outcome.exit_code()))
        }

        Command::Stop => {
            simrun_core::stop(&SimrunConfig::load()).await;
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "success": true }));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Config => {
            let config = SimrunConfig::load();
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| CliError::Output(e.to_string()))?;
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_outcome(outcome: &LaunchOutcome, format: OutputFormat) -> Result<(), CliError> {
    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(outcome)
            .map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    match outcome {
        LaunchOutcome::Success { payload: Some(payload) } => {
            println!("Finished");
            let json = serde_json::to_string_pretty(payload)
                .map_err(|e| CliError::Output(e.to_string()))?;
            println!("{}", json);
        }
        LaunchOutcome::Success { payload: None } => println!("Finished"),
        LaunchOutcome::Crashed { report } => {
            println!("Crashed: {}", report.readable_path.display());
        }
        LaunchOutcome::TimedOut => println!("Timed out"),
        LaunchOutcome::SignalTerminated { signal } => println!("Killed by {}", signal),
        LaunchOutcome::ProcessError { message } => println!("Launcher error: {}", message),
        LaunchOutcome::ExitedNonZero { code } => println!("Exited with code {}", code),
    }
    Ok(())
}
