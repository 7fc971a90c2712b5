use anyhow::{bail, Context, Result};
use ccsearch::{
    config::{RunConfig, RunOverrides},
    engine::{CatalogEngine, EngineFactory, SearchEngine, SearchType},
    errors::SearchResult,
    index::{ComponentIndex, MatchIndex, PathEntry, PathRow, PriorityList, VariantIndex},
    job::{jobs_from_glob, load_job_list},
    results::{RunReport, WorkerResult},
    search::{exec_job_list, ChunkStrategy, ExecutionMode, Worker, WorkerPool},
    stop::{self, RunContext},
    storage,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io::IsTerminal;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    InProcess,
    Isolated,
}

impl From<CliMode> for ExecutionMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::InProcess => ExecutionMode::InProcess,
            CliMode::Isolated => ExecutionMode::Isolated,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexKind {
    Match,
    Component,
    Variant,
}

#[derive(Subcommand)]
enum Commands {
    /// Distribute a job list over parallel workers
    Run {
        /// Line list of query files
        #[arg(short = 'l', long, conflicts_with = "query_glob")]
        query_list: Option<PathBuf>,

        /// Glob selecting query files, e.g. "queries/*.mol2"
        #[arg(short = 'g', long)]
        query_glob: Option<String>,

        /// First record of the query list to run (1-based)
        #[arg(long, requires = "end_record")]
        start_record: Option<usize>,

        /// Last record of the query list to run (inclusive)
        #[arg(long, requires = "start_record")]
        end_record: Option<usize>,

        #[arg(short = 'r', long)]
        result_path: Option<PathBuf>,

        #[arg(short = 't', long)]
        search_type: Option<SearchType>,

        #[arg(short = 'e', long)]
        engine_home: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(short = 'j', long)]
        workers: Option<NonZeroUsize>,

        /// Jobs per chunk
        #[arg(long)]
        chunk_size: Option<NonZeroUsize>,

        #[arg(short = 'm', long, value_enum)]
        mode: Option<CliMode>,

        /// Per-chunk timeout in seconds for isolated workers
        #[arg(long)]
        timeout: Option<u64>,

        /// Program run for each isolated chunk
        #[arg(long)]
        exec_program: Option<PathBuf>,

        /// Write the paths of matched queries here
        #[arg(long)]
        hit_list_path: Option<PathBuf>,

        /// Remove a leftover STOP file before starting
        #[arg(long)]
        clear_stop: bool,

        #[arg(long)]
        no_progress: bool,
    },

    /// Search one job list in this process (used by isolated workers)
    Exec {
        #[arg(long)]
        mol_list_path: PathBuf,

        #[arg(long)]
        result_path: PathBuf,

        #[arg(long)]
        search_type: Option<SearchType>,

        #[arg(long)]
        engine_home: Option<PathBuf>,

        #[arg(long)]
        hit_list_path: Option<PathBuf>,

        #[arg(long, requires = "end_record")]
        start_record: Option<usize>,

        #[arg(long, requires = "start_record")]
        end_record: Option<usize>,
    },

    /// Substructure search keyed by a SMARTS pattern
    Pattern {
        /// Identifier used for the result directory and index
        #[arg(long)]
        query_id: String,

        #[arg(short, long)]
        pattern: String,

        #[arg(short = 'r', long)]
        result_path: Option<PathBuf>,

        #[arg(short = 'e', long)]
        engine_home: Option<PathBuf>,
    },

    /// Ask running workers to stop after their current job
    Stop {
        #[arg(short = 'r', long)]
        result_path: PathBuf,

        /// Remove the STOP file instead of creating it
        #[arg(long)]
        clear: bool,
    },

    /// Inspect a match, component or variant index
    Index {
        #[arg(value_enum)]
        kind: IndexKind,

        /// Index file
        path: PathBuf,

        /// Order groups by this id list
        #[arg(long)]
        priority: Option<PathBuf>,

        /// Exclude ids listed here
        #[arg(long, requires = "priority")]
        filter: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            query_list,
            query_glob,
            start_record,
            end_record,
            result_path,
            search_type,
            engine_home,
            workers,
            chunk_size,
            mode,
            timeout,
            exec_program,
            hit_list_path,
            clear_stop,
            no_progress,
        } => {
            let config = load_config(
                cli.config.as_deref(),
                RunOverrides {
                    result_path,
                    search_type,
                    engine_home,
                    num_workers: workers,
                    chunk_size,
                    mode: mode.map(ExecutionMode::from),
                    chunk_timeout_secs: timeout,
                    exec_program,
                    log_level: cli.log_level,
                },
            )?;
            init_logging(&config.log_level);

            let jobs = match (query_list, query_glob) {
                (Some(list), _) => load_job_list(&list, start_record, end_record)?,
                (None, Some(pattern)) => jobs_from_glob(&pattern)?,
                (None, None) => bail!("one of --query-list or --query-glob is required"),
            };

            if clear_stop && stop::clear_stop(&config.result_path)? {
                info!("Removed STOP file in {}", config.result_path.display());
            }

            let strategy = ChunkStrategy::from_config(&config, catalog_factory(&config))?;
            let show_progress = !no_progress && std::io::stderr().is_terminal();
            let pool = WorkerPool::new(strategy, config.pool_options(show_progress));
            let ctx = RunContext::new(&config.result_path);
            let report = pool.run_search(&jobs, &ctx)?;

            if let Some(path) = hit_list_path {
                storage::export_list(&path, &report.combined.result_list)?;
                info!("Hit list written to {}", path.display());
            }
            print_report(&report);
            Ok(())
        }
        Commands::Exec {
            mol_list_path,
            result_path,
            search_type,
            engine_home,
            hit_list_path,
            start_record,
            end_record,
        } => {
            let config = load_config(
                cli.config.as_deref(),
                RunOverrides {
                    result_path: Some(result_path),
                    search_type,
                    engine_home,
                    log_level: cli.log_level,
                    ..RunOverrides::default()
                },
            )?;
            init_logging(&config.log_level);

            let jobs = load_job_list(&mol_list_path, start_record, end_record)?;
            let engine = CatalogEngine::new(&config.engine_home)?;
            let mut worker = Worker::new(Box::new(engine), config.engine.clone())?;
            let ctx = RunContext::new(&config.result_path);
            let result = exec_job_list(&mut worker, jobs, &ctx, hit_list_path.as_deref())?;
            print_outcome(&result);
            Ok(())
        }
        Commands::Pattern {
            query_id,
            pattern,
            result_path,
            engine_home,
        } => {
            let config = load_config(
                cli.config.as_deref(),
                RunOverrides {
                    result_path,
                    search_type: Some(SearchType::Substructure),
                    engine_home,
                    log_level: cli.log_level,
                    ..RunOverrides::default()
                },
            )?;
            init_logging(&config.log_level);

            let engine = CatalogEngine::new(&config.engine_home)?;
            let mut worker = Worker::new(Box::new(engine), config.engine.clone())?;
            let outcome = worker.search_pattern(&query_id, &pattern, &config.result_path);
            println!("{}: {:?}", query_id.blue(), outcome);
            Ok(())
        }
        Commands::Stop { result_path, clear } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            if clear {
                if stop::clear_stop(&result_path)? {
                    println!("Removed STOP in {}", result_path.display());
                } else {
                    println!("No STOP in {}", result_path.display());
                }
            } else {
                let path = stop::request_stop(&result_path)?;
                println!("Created {}", path.display());
            }
            Ok(())
        }
        Commands::Index {
            kind,
            path,
            priority,
            filter,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            if !storage::exists(&path) {
                bail!("index file {} does not exist", path.display());
            }
            match kind {
                IndexKind::Match => {
                    let mut index = MatchIndex::new(&path);
                    if !index.read_index() {
                        bail!("cannot read match index {}", path.display());
                    }
                    println!("{}", serde_json::to_string_pretty(index.rows())?);
                }
                IndexKind::Component => {
                    let index = ComponentIndex::open(&path);
                    print_path_index(
                        || index.make_path_list(),
                        |p, f| index.make_priority_list(p, f),
                        priority.as_deref(),
                        filter.as_deref(),
                    );
                }
                IndexKind::Variant => {
                    let index = VariantIndex::open(&path);
                    print_path_index(
                        || index.make_path_list(),
                        |p, f| index.make_priority_list(p, f),
                        priority.as_deref(),
                        filter.as_deref(),
                    );
                }
            }
            Ok(())
        }
    }
}

fn load_config(config_path: Option<&Path>, overrides: RunOverrides) -> Result<RunConfig> {
    let config = RunConfig::load_from(config_path)
        .context("failed to load configuration")?
        .merge_with_cli(overrides);
    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Logs go to stderr; stdout carries the report
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn catalog_factory(config: &RunConfig) -> Arc<EngineFactory> {
    let home = config.engine_home.clone();
    Arc::new(move || -> SearchResult<Box<dyn SearchEngine>> {
        Ok(Box::new(CatalogEngine::new(&home)?))
    })
}

fn print_report(report: &RunReport) {
    println!(
        "\n{} jobs in {} chunks, finished in {}",
        report.total_jobs,
        report.total_chunks,
        format!("{:.2}s", report.elapsed.as_secs_f64())
    );
    println!("  {} {}", "matched:".green(), report.success_count());
    println!("  {} {}", "no match:".yellow(), report.no_match_count());
    println!("  {} {}", "failed:".red(), report.failure_count());
    if report.stopped() {
        println!(
            "  {} {} jobs not processed",
            "stopped:".magenta(),
            report.unprocessed_count()
        );
    }
}

fn print_outcome(result: &WorkerResult) {
    println!(
        "{} matched, {} no match, {} failed",
        result.success_list.len().to_string().green(),
        result.no_match_list.len().to_string().yellow(),
        result.fail_list.len().to_string().red()
    );
}

fn print_path_index<R, L, P>(
    list: L,
    priority_list: P,
    priority: Option<&Path>,
    filter: Option<&Path>,
) where
    R: PathRow,
    L: Fn() -> Vec<(String, PathEntry<R>)>,
    P: Fn(&Path, Option<&Path>) -> PriorityList<R>,
{
    let entries = match priority {
        Some(priority) => {
            let result = priority_list(priority, filter);
            println!("{} {}", "filtered:".yellow(), result.filtered);
            result.entries
        }
        None => list(),
    };
    for (cc_id, entry) in entries {
        println!(
            "{}\t{}\t{}",
            cc_id.blue(),
            entry.id(),
            entry.cif_path.display()
        );
    }
}
