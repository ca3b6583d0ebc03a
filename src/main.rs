//! psik — command-line entry point.
//!
//! Thin glue over the library (spec §1's CLI non-goal): parse flags,
//! load config, build a `Manager`, call the matching core operation,
//! print a short line. No business logic lives here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use psik::archive;
use psik::config;
use psik::jobdir::JobDir;
use psik::manager::Manager;
use psik::model::{JobSpec, JobState};

#[derive(Debug, Parser)]
#[command(name = "psik")]
#[command(about = "Portable job-submission layer", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Explicit config path; falls back to PSIK_CONFIG, then a
    /// directories-resolved default.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a job from a JobSpec JSON file and submit it.
    Run {
        /// Path to a JobSpec JSON document.
        spec: PathBuf,
    },

    /// Resubmit an already-created job (allocates the next jobndx).
    Start { stamp: String },

    /// List known jobs, most recent first.
    Ls,

    /// Summarize a job's current state.
    Status { stamp: String },

    /// Cancel a job's outstanding runs.
    Cancel { stamp: String },

    /// Reconcile backend-observed state into local history.
    Poll { stamp: String },

    /// Remove a job directory.
    Rm { stamp: String },

    /// [Engine entrypoint] create (if missing) and run a job
    /// synchronously; exits with the run's return code.
    #[command(name = "hot-start")]
    HotStart {
        stamp: String,
        jobndx: u64,
        jobspec_json: String,
        archive_b64: Option<String>,
    },

    /// [Engine entrypoint] append a transition and dispatch its
    /// callback; exits nonzero on callback failure.
    Reached {
        base: PathBuf,
        jobndx: u64,
        state: String,
        info: Option<String>,
    },

    /// Print the crate version.
    Version,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Version => {
            println!("psik {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }

        Command::HotStart {
            stamp,
            jobndx,
            jobspec_json,
            archive_b64,
        } => {
            let manager = load_manager(cli.config.as_deref())?;
            let spec = JobSpec::from_json(&jobspec_json).context("parsing jobspec for hot-start")?;
            let dir = JobDir::new(manager.prefix(), &stamp);
            let job = manager.create(spec, Some(dir))?;
            if let Some(archive) = archive_b64 {
                archive::unpack_to_dir(&archive, &job.dir().work_dir())
                    .context("unpacking hot-start archive")?;
            }
            let code = job.execute(jobndx, &BTreeMap::new())?;
            Ok(code)
        }

        Command::Reached {
            base,
            jobndx,
            state,
            info,
        } => {
            let job = psik::job::Job::open(JobDir::at(base))?;
            let state = JobState::parse(&state)?;
            let ok = job.reached(jobndx, state, info.as_deref().unwrap_or(""), None)?;
            Ok(if ok { 0 } else { 1 })
        }

        Command::Run { spec } => {
            let manager = load_manager(cli.config.as_deref())?;
            let raw = std::fs::read_to_string(&spec)
                .with_context(|| format!("reading jobspec at {}", spec.display()))?;
            let jobspec = JobSpec::from_json(&raw)?;
            let job = manager.create(jobspec, None)?;
            let (jobndx, native_id) = job.submit()?;
            println!("{} jobndx={jobndx} native_id={native_id}", job.stamp());
            Ok(0)
        }

        Command::Start { stamp } => {
            let manager = load_manager(cli.config.as_deref())?;
            let job = manager.open(&stamp)?;
            let (jobndx, native_id) = job.submit()?;
            println!("{stamp} jobndx={jobndx} native_id={native_id}");
            Ok(0)
        }

        Command::Ls => {
            let manager = load_manager(cli.config.as_deref())?;
            for job in manager.ls()? {
                let summary = job.summarize()?;
                println!("{} next_jobndx={}", job.stamp(), summary.next_jobndx);
            }
            Ok(0)
        }

        Command::Status { stamp } => {
            let manager = load_manager(cli.config.as_deref())?;
            let job = manager.open(&stamp)?;
            let summary = job.summarize()?;
            println!("{stamp} next_jobndx={}", summary.next_jobndx);
            for (state, indices) in &summary.by_state {
                println!("  {state}: {indices:?}");
            }
            Ok(0)
        }

        Command::Cancel { stamp } => {
            let manager = load_manager(cli.config.as_deref())?;
            manager.open(&stamp)?.cancel()?;
            println!("{stamp} canceled");
            Ok(0)
        }

        Command::Poll { stamp } => {
            let manager = load_manager(cli.config.as_deref())?;
            manager.open(&stamp)?.poll()?;
            println!("{stamp} polled");
            Ok(0)
        }

        Command::Rm { stamp } => {
            let manager = load_manager(cli.config.as_deref())?;
            manager.remove(&stamp)?;
            println!("{stamp} removed");
            Ok(0)
        }
    }
}

fn load_manager(explicit_config: Option<&str>) -> Result<Manager> {
    let path = config::resolve_config_path(explicit_config);
    let config = config::load_config(&path)?;
    Ok(Manager::new(config)?)
}
