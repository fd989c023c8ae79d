use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug};

use sudolikeaboss::{Config, Error, Mode, Outcome};

/// Exit status when the overall deadline elapses, as timeout(1) uses.
const EXIT_TIMEOUT: u8 = 124;

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(io::stderr(), "Error: {err:#}");
            let timed_out = err.downcast_ref::<Error>().is_some_and(Error::is_timeout);
            ExitCode::from(if timed_out { EXIT_TIMEOUT } else { 1 })
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "sudolikeaboss",
    version,
    about = "Fetch a password from 1Password for use in the terminal"
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Maximum seconds to wait for the password
    #[arg(long = "timeout", value_name = "SECONDS", global = true)]
    timeout: Option<u64>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Register sudolikeaboss with the 1Password helper
    Register,
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.common.config.as_deref()).context("loading configuration")?;
    if let Some(timeout) = cli.common.timeout {
        config.timeout_secs = timeout;
    }
    init_logging(&cli.common, &config);
    debug!("Effective configuration: {config:?}");

    let mode = match cli.command {
        Some(Command::Register) => Mode::Register,
        None => Mode::Fetch,
    };

    match async_main(config, mode)? {
        Outcome::Password(password) => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{password}").context("writing password")?;
            stdout.flush().context("writing password")?;
        }
        Outcome::Registered => eprintln!("sudolikeaboss is now registered."),
        Outcome::AlreadyRegistered => eprintln!("sudolikeaboss is already registered."),
    }
    Ok(())
}

#[tokio::main]
async fn async_main(config: Config, mode: Mode) -> Result<Outcome> {
    let outcome = sudolikeaboss::run(config, mode).await?;
    Ok(outcome)
}

fn init_logging(common: &CommonOpts, config: &Config) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return;
    }

    let level = effective_log_level(common, config);
    let directive = level.to_string().to_lowercase();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sudolikeaboss={directive},sudolikeaboss_protocol={directive}"
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(level >= LevelFilter::Debug),
        )
        .try_init()
        .ok();

    // Also init env_logger for compatibility with log crate users
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(directive.as_str()),
    );
    builder.filter_level(level);
    builder.target(env_logger::Target::Stderr);
    builder.try_init().ok();
}

fn effective_log_level(common: &CommonOpts, config: &Config) -> LevelFilter {
    if common.trace {
        LevelFilter::Trace
    } else if common.debug {
        LevelFilter::Debug
    } else {
        match common.verbose {
            0 => config
                .log_level
                .parse::<LevelFilter>()
                .unwrap_or(LevelFilter::Error),
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
