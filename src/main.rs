use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use spine::cli::{self, discover, rollback, run, stage, status, verify, RunFlags};
use spine::{Config, Error, Warehouse};

#[derive(Parser)]
#[command(name = "spine")]
#[command(about = "SPINE ingestion pipeline: session logs into a validated, linked entity table")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "spine.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a window of the pipeline (default: every stage)
    Run {
        #[command(flatten)]
        flags: RunFlags,

        /// First stage of the window
        #[arg(long)]
        from_stage: Option<u8>,

        /// Last stage of the window
        #[arg(long)]
        to_stage: Option<u8>,
    },

    /// Run a single stage
    Stage {
        /// Stage number (0-16)
        number: u8,

        #[command(flatten)]
        flags: RunFlags,
    },

    /// Assess the source files and print a GO / NO-GO verdict
    Discover {
        /// Directory holding session files
        #[arg(long)]
        source_dir: Option<String>,

        /// Run id for the manifest (default: mint a fresh one)
        #[arg(long)]
        run_id: Option<String>,

        /// Print the assessment without writing the manifest
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every row a run wrote
    Rollback {
        #[arg(long)]
        run_id: String,

        /// Only this stage's table and dead-letter queue
        #[arg(long)]
        stage: Option<u8>,

        /// Also remove the run's rows from entity_unified
        #[arg(long)]
        rollback_promoted: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        confirm: bool,
    },

    /// Run verification probes
    Verify {
        /// Probe one stage (default: all)
        #[arg(long)]
        stage: Option<u8>,

        #[arg(long)]
        run_id: Option<String>,
    },

    /// Show recorded runs, or one run's stages
    Status {
        #[arg(long)]
        run_id: Option<String>,

        /// How many recent runs to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Cli::parse();
    match dispatch(args) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            // library errors carry their own exit code and plain restatement
            let code = match err.downcast_ref::<Error>() {
                Some(e) => {
                    eprintln!("❌ {}", e.plain());
                    e.exit_code()
                }
                None => 4,
            };
            eprintln!("   {:#}", err);
            std::process::exit(code);
        }
    }
}

/// Run the subcommand; `Ok` carries the exit code.
fn dispatch(args: Cli) -> Result<i32> {
    let config = Config::load(&args.config).context("could not load configuration")?;

    match args.command {
        Commands::Run {
            flags,
            from_stage,
            to_stage,
        } => {
            let ctx = cli::open_context(config, &flags)?;
            run::run(&ctx, flags.run_id.as_deref(), from_stage, to_stage)?;
        }
        Commands::Stage { number, flags } => {
            let ctx = cli::open_context(config, &flags)?;
            if number == 0 {
                let go = discover::run(&ctx, flags.run_id.as_deref())?;
                return Ok(if go { 0 } else { 1 });
            }
            stage::run(&ctx, number, flags.run_id.as_deref())?;
        }
        Commands::Discover {
            source_dir,
            run_id,
            dry_run,
        } => {
            let flags = RunFlags {
                source_dir,
                dry_run,
                ..RunFlags::default()
            };
            let ctx = cli::open_context(config, &flags)?;
            let go = discover::run(&ctx, run_id.as_deref())?;
            return Ok(if go { 0 } else { 1 });
        }
        Commands::Rollback {
            run_id,
            stage,
            rollback_promoted,
            confirm,
        } => {
            let warehouse = Warehouse::open(&config)?;
            let stdin = std::io::stdin();
            rollback::run(&warehouse, &run_id, stage, rollback_promoted, confirm, stdin.lock())?;
        }
        Commands::Verify { stage, run_id } => {
            let warehouse = Warehouse::open(&config)?;
            let passed = verify::run(&warehouse, config.assessment_dir(), stage, run_id.as_deref())?;
            return Ok(if passed { 0 } else { 1 });
        }
        Commands::Status { run_id, limit } => {
            let warehouse = Warehouse::open(&config)?;
            status::run(&warehouse, run_id.as_deref(), limit)?;
        }
    }

    Ok(0)
}
