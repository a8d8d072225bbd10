//! pgflightd - adaptive PostgreSQL activity recorder daemon.
//!
//! Samples wait events, sessions and lock chains into an in-memory ring
//! buffer and promotes them to durable aggregates and raw archives on their
//! own cadences. Each periodic job runs on its own thread.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
fn release_memory_to_os() {
    // SAFETY: mallctl with a valid NUL-terminated name and no in/out buffers.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            c"arena.0.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgflight_core::collector::{MockSurface, PostgresSurface, TargetSurface};
use pgflight_core::config::ConfigStore;
use pgflight_core::jobs::next_fire;
use pgflight_core::{Recorder, RecorderError};

/// Adaptive PostgreSQL activity recorder.
#[derive(Parser)]
#[command(name = "pgflightd", about = "Adaptive PostgreSQL activity recorder", version)]
struct Args {
    /// INI configuration file. Keys in `[section]` become `section.key`.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for aggregates, archives, attempt history and watermarks.
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Override a configuration key (repeatable), e.g. --set mode.auto=false
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Sample a built-in mock server instead of PostgreSQL.
    #[arg(long)]
    mock: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgflightd", "pgflight_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<ConfigStore, RecorderError> {
    let store = match &args.config {
        Some(path) => ConfigStore::load_ini(path)?,
        None => ConfigStore::new(),
    };
    store.apply_overrides(args.overrides.as_slice())?;
    Ok(store)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("pgflightd {} starting", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let result = if args.mock {
        info!("target: built-in mock server");
        run(&args, config, MockSurface::typical())
    } else {
        match PostgresSurface::from_env() {
            Ok(surface) => {
                let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
                let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
                info!("target: PostgreSQL at {}:{}", host, port);
                run(&args, config, surface)
            }
            Err(e) => {
                print_pg_warning(&e.to_string());
                std::process::exit(2);
            }
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run<S: TargetSurface + 'static>(
    args: &Args,
    config: ConfigStore,
    surface: S,
) -> Result<(), RecorderError> {
    let recorder = Arc::new(Recorder::open(&args.data_dir, config, surface)?);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let jitter = Duration::from_secs(recorder.config().snapshot().sampler.jitter_max_seconds);
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    workers.push(spawn_job("sampler", &running, &recorder, jitter, |rec| {
        match rec.sample() {
            Ok(outcome) => {
                if let Some(change) = outcome.mode_change {
                    info!(from = %change.from, to = %change.to, "sampling mode switched");
                }
            }
            Err(e) => error!("sampling failed: {}", e),
        }
        rec.sample_interval()
    }));

    workers.push(spawn_job("flush", &running, &recorder, Duration::ZERO, |rec| {
        match rec.flush() {
            Ok(report) => {
                if report.windows > 0 {
                    release_memory_to_os();
                    debug!("Memory released after flush");
                }
            }
            Err(e) => error!("flush failed: {}", e),
        }
        Duration::from_secs(rec.config().snapshot().flush_interval_seconds)
    }));

    workers.push(spawn_job("archive", &running, &recorder, Duration::ZERO, |rec| {
        if let Err(e) = rec.archive() {
            error!("archive failed: {}", e);
        }
        Duration::from_secs(rec.config().snapshot().archive.interval_seconds)
    }));

    workers.push(spawn_job("cleanup", &running, &recorder, Duration::ZERO, |rec| {
        if let Err(e) = rec.cleanup() {
            error!("cleanup failed: {}", e);
        }
        Duration::from_secs(rec.config().snapshot().cleanup_interval_seconds)
    }));

    for worker in workers {
        if worker.join().is_err() {
            error!("worker thread panicked");
        }
    }

    info!("Shutting down...");
    match recorder.flush() {
        Ok(report) => info!(slots = report.slots, windows = report.windows, "final flush done"),
        Err(e) => error!("final flush failed: {}", e),
    }
    info!("Shutdown complete");
    Ok(())
}

/// Runs `tick` immediately and then again after each returned interval,
/// until `running` is cleared.
fn spawn_job<S, F>(
    name: &'static str,
    running: &Arc<AtomicBool>,
    recorder: &Arc<Recorder<S>>,
    jitter: Duration,
    tick: F,
) -> JoinHandle<()>
where
    S: TargetSurface + 'static,
    F: Fn(&Recorder<S>) -> Duration + Send + 'static,
{
    let running = running.clone();
    let recorder = recorder.clone();
    std::thread::spawn(move || {
        debug!(job = name, "job thread started");
        while running.load(Ordering::SeqCst) {
            // The interval is re-read after every run so mode switches apply.
            let interval = tick(&recorder);
            let fire_at = next_fire(Instant::now(), interval, jitter);
            sleep_until(fire_at, &running);
        }
        debug!(job = name, "job thread stopped");
    })
}

/// Sleeps in short steps so a shutdown signal is noticed quickly.
fn sleep_until(deadline: Instant, running: &AtomicBool) {
    let step = Duration::from_millis(100);
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(step));
    }
}

/// Prints a colored PostgreSQL warning with configuration hints.
fn print_pg_warning(error: &str) {
    const RED: &str = "\x1b[1;31m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    eprintln!("{RED}PostgreSQL: {error}{RESET}");
    eprintln!();
    eprintln!("{YELLOW}  Configure connection with environment variables:");
    eprintln!("    export PGHOST=localhost");
    eprintln!("    export PGPORT=5432");
    eprintln!("    export PGUSER=postgres");
    eprintln!("    export PGPASSWORD=secret");
    eprintln!("    export PGDATABASE=postgres");
    eprintln!();
    eprintln!("  Or run with --mock to record a simulated server.{RESET}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_reach_the_config() {
        let args = Args::parse_from([
            "pgflightd",
            "--set",
            "mode.auto=false",
            "--set",
            "ring.slots=240",
            "--mock",
        ]);
        let config = load_config(&args).unwrap().snapshot();
        assert!(!config.mode.auto);
        assert_eq!(config.ring.slots, 240);
        assert!(args.mock);
    }

    #[test]
    fn sleep_until_returns_when_stopped() {
        let running = AtomicBool::new(false);
        let started = Instant::now();
        sleep_until(started + Duration::from_secs(60), &running);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
