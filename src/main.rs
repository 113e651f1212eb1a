use chrono::{Days, Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use trend_stock::config::PipelineConfig;
use trend_stock::context::{CancelToken, EventSink};
use trend_stock::pipeline::{self, PipelineRunner};
use trend_stock::render::renderer_from_config;
use trend_stock::store::ArtifactStore;
use trend_stock::trends::{FallbackSource, FileTrendSource, SeasonalTrendSource, TrendSource};
use trend_stock::{config, output};

/// Shared flag for commands that operate on one date partition.
#[derive(clap::Args, Clone)]
struct DateArgs {
    /// Run date (YYYY-MM-DD). Defaults to today in local time
    #[arg(long)]
    date: Option<NaiveDate>,
}

impl DateArgs {
    fn resolve(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }
}

#[derive(Parser)]
#[command(name = "trend-stock")]
#[command(about = "Turn daily trending searches into staged stock-image upload bundles")]
#[command(long_about = "\
Turn daily trending searches into staged stock-image upload bundles

Each run works on one date partition and moves through five stages:
scrape trends, normalize keywords, generate images, compose metadata and
stage upload bundles. Every artifact is stored by date and keyword, so
re-running a date only does the work that is still missing.

Output structure:

  output/
  └── 2026-10-18/
      ├── keywords.json            # Keyword set for the date (merged across runs)
      ├── trends_data.json         # Raw trend snapshot
      ├── images/forest.jpg        # Generated image
      ├── metadata/forest.json     # Title, description, tags
      ├── upload_ready/
      │   ├── forest.jpg           # Bundle image (copy of the generated image)
      │   └── forest.json          # Bundle manifest
      └── logs/
          ├── forest.log           # Per-keyword history
          └── summary.json         # Last run summary

Exit codes: 0 completed, 2 partially completed, 1 failed.

Run 'trend-stock gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Output root (overrides `output_root` from config.toml)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for one date
    Run {
        #[command(flatten)]
        date: DateArgs,
        /// Scraper snapshot to read trends from (JSON)
        #[arg(long)]
        trends: Option<PathBuf>,
        /// Fail instead of falling back to seasonal trends when --trends is unusable
        #[arg(long, requires = "trends")]
        strict: bool,
        /// Re-render images that already exist
        #[arg(long)]
        force: bool,
    },
    /// Show which artifacts exist for a date
    Status(DateArgs),
    /// Validate config and check that the output root is writable
    Check,
    /// Delete date partitions older than the retention window
    Prune {
        /// Override `retention.keep_days`
        #[arg(long)]
        keep_days: Option<u32>,
        /// Reference date for the window. Defaults to today
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run {
            date,
            trends,
            strict,
            force,
        } => {
            let (config, store) = open(&cli.config_dir, cli.output)?;
            let date = date.resolve();
            let source = trend_source(trends, strict);
            let renderer = renderer_from_config(&config.generation)
                .ok_or("renderer = \"command\" needs a non-empty `command`")?;

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                eprintln!("Cancelling after in-flight keywords finish...");
                handler_token.cancel();
            })?;

            println!("==> Run {} → {}", date, store.run_dir(date).display());
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = PipelineRunner::new(&config, &store, source.as_ref(), renderer.as_ref())
                .with_events(EventSink::new(tx))
                .with_cancel(cancel)
                .force(force)
                .run(date);
            printer.join().map_err(|_| "output thread panicked")?;

            let code = match result {
                Ok(summary) => {
                    output::print_summary(&summary);
                    summary.exit_code()
                }
                Err(failure) => {
                    output::print_failure(&failure);
                    failure.exit_code()
                }
            };
            std::process::exit(code);
        }
        Command::Status(date) => {
            let (_, store) = open(&cli.config_dir, cli.output)?;
            let date = date.resolve();
            match pipeline::run_status(&store, date)? {
                Some(status) => output::print_status(&status),
                None => println!("No run for {} under {}", date, store.root().display()),
            }
        }
        Command::Check => {
            let (config, store) = open(&cli.config_dir, cli.output)?;
            println!("==> Checking {}", cli.config_dir.join("config.toml").display());
            renderer_from_config(&config.generation)
                .ok_or("renderer = \"command\" needs a non-empty `command`")?;
            std::fs::create_dir_all(store.root())?;
            let probe = store.root().join(".write-probe");
            std::fs::write(&probe, b"ok")?;
            std::fs::remove_file(&probe)?;
            println!("Output root: {}", store.root().display());
            println!("Renderer: {:?}", config.generation.renderer);
            println!("Workers: {}", config::effective_workers(&config.processing));
            println!("==> Config is valid");
        }
        Command::Prune { keep_days, today } => {
            let (config, store) = open(&cli.config_dir, cli.output)?;
            let keep_days = keep_days.unwrap_or(config.retention.keep_days);
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let cutoff = today
                .checked_sub_days(Days::new(u64::from(keep_days)))
                .ok_or("retention window reaches before the earliest representable date")?;
            let removed = store.prune_before(cutoff)?;
            output::print_prune(&removed);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load config.toml and open the store under its output root, or under
/// `output` when given.
fn open(
    config_dir: &Path,
    output: Option<PathBuf>,
) -> Result<(PipelineConfig, ArtifactStore), config::ConfigError> {
    let mut config = config::load_config(config_dir)?;
    if let Some(output) = output {
        config.output_root = output;
    }
    let store = ArtifactStore::new(&config.output_root);
    Ok((config, store))
}

/// Diagnostics go to stderr so stdout stays the run report.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// A snapshot file backed by the seasonal baseline, or the baseline alone.
fn trend_source(trends: Option<PathBuf>, strict: bool) -> Box<dyn TrendSource> {
    match trends {
        Some(path) if strict => Box::new(FileTrendSource::new(path)),
        Some(path) => Box::new(FallbackSource::new(vec![
            Box::new(FileTrendSource::new(path)),
            Box::new(SeasonalTrendSource),
        ])),
        None => Box::new(SeasonalTrendSource),
    }
}
