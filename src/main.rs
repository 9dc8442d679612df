// ADAPT -- RUNTIME KNOB CONTROL DEMO
// DRIVES THE LIBRARY'S CONTROL LOOP AGAINST A RECURSIVE LEAST SQUARES FILTER
//
// LIBRARY: INTENT, PREDICTION, PLANNING, EXECUTION (src/lib.rs)
// BINARY:  FLAGS, LOGGING SETUP, SHUTDOWN, REPORTING

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use adapt::config::{DEFAULT_BANDWIDTH, DEFAULT_MAX_DOMAIN, DEFAULT_QUANTIZE_LEVELS, DEFAULT_WINDOW};
use adapt::AdaptConfig;

use cli::rls::{demo_intent, run_rls, RlsArgs};
use cli::space::run_space;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "adapt")]
#[command(about = "ADAPT -- RUNTIME KNOB CONTROL FOR HOT FUNCTIONS")]
struct Cli {
    // DEBUG-LEVEL LOGGING (RUST_LOG OVERRIDES)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // RUN THE CONTROLLED RLS FILTER
    Rls(RlsOpts),
    // PRINT THE DEMO INTENT'S QUANTIZED CONFIGURATION SPACE
    Space(SpaceOpts),
}

#[derive(Args)]
struct ControlOpts {
    // CALLS PER SCHEDULE
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    window: usize,

    // OVERLOAD KERNEL BANDWIDTH IN SECONDS
    #[arg(long, default_value_t = DEFAULT_BANDWIDTH)]
    bandwidth: f64,

    // SAMPLES PER CONTINUOUS KNOB
    #[arg(long, default_value_t = DEFAULT_QUANTIZE_LEVELS)]
    levels: usize,

    // LARGEST CONFIGURATION SPACE ACCEPTED
    #[arg(long, default_value_t = DEFAULT_MAX_DOMAIN)]
    max_domain: usize,

    // SOLVER DEADLINE IN MILLISECONDS (0 = NO DEADLINE)
    #[arg(long, default_value_t = 0)]
    solver_timeout_ms: u64,
}

impl ControlOpts {
    fn to_config(&self, record_history: bool) -> AdaptConfig {
        let config = AdaptConfig {
            window: self.window,
            bandwidth: self.bandwidth,
            quantize_levels: self.levels,
            max_domain: self.max_domain,
            solver_timeout: None,
            record_history,
        };
        if self.solver_timeout_ms > 0 {
            config.with_solver_timeout(Duration::from_millis(self.solver_timeout_ms))
        } else {
            config
        }
    }
}

#[derive(Args)]
struct RlsOpts {
    #[command(flatten)]
    control: ControlOpts,

    // CONTROLLED CALLS TO MAKE
    #[arg(long, default_value_t = 2000)]
    iterations: u64,

    // SAMPLES KEPT IN THE SLIDING WINDOW
    #[arg(long, default_value_t = 64)]
    history: usize,

    // RESIDUAL CONSTRAINT: residual <= THIS
    #[arg(long, default_value_t = 0.05)]
    max_residual: f64,

    // UNIFORM NOISE AMPLITUDE ON THE DESIRED SIGNAL
    #[arg(long, default_value_t = 0.01)]
    noise: f64,

    // RNG SEED FOR THE INPUT STREAM
    #[arg(long, default_value_t = 42)]
    seed: u64,

    // PROFILING RUNS PER CONFIGURATION
    #[arg(long, default_value_t = 3)]
    profile_runs: usize,

    // PRINT A STATUS LINE EVERY N CALLS (0 = QUIET)
    #[arg(long, default_value_t = 250)]
    report_every: u64,

    // RECORD PER-CALL HISTORY AND PRINT THE SUMMARY
    #[arg(long)]
    history_log: bool,

    // DUMP THE FULL HISTORY TABLE ON EXIT (IMPLIES --history-log)
    #[arg(long)]
    dump_log: bool,
}

#[derive(Args)]
struct SpaceOpts {
    // SAMPLES PER CONTINUOUS KNOB
    #[arg(long, default_value_t = DEFAULT_QUANTIZE_LEVELS)]
    levels: usize,

    // LARGEST CONFIGURATION SPACE ACCEPTED
    #[arg(long, default_value_t = DEFAULT_MAX_DOMAIN)]
    max_domain: usize,

    #[arg(long, default_value_t = 0.05)]
    max_residual: f64,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    match cli.command {
        Command::Rls(opts) => {
            let record = opts.history_log || opts.dump_log;
            let config = opts.control.to_config(record);
            config.validate()?;
            let args = RlsArgs {
                iterations: opts.iterations,
                history: opts.history,
                max_residual: opts.max_residual,
                noise: opts.noise,
                seed: opts.seed,
                profile_runs: opts.profile_runs,
                report_every: opts.report_every,
                dump_log: opts.dump_log,
                config,
            };
            run_rls(&args, &SHUTDOWN)?;
            println!("ADAPT OUT.");
        }
        Command::Space(opts) => {
            let intent = demo_intent(opts.max_residual, opts.levels)?;
            run_space(&intent, opts.max_domain)?;
        }
    }
    Ok(())
}
