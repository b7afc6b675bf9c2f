//! # github-trend CLI (`gtrend`)
//!
//! ## Usage
//!
//! ```bash
//! gtrend --config ./config/gtrend.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gtrend init` | Create the SQLite database and run schema migrations |
//! | `gtrend discover` | Page through search results for a creation-date range |
//! | `gtrend enrich` | Fetch README, contributors and star history; write vectors |
//! | `gtrend search "<query>"` | Semantic search over indexed repositories |
//! | `gtrend ask "<question>"` | Answer a question from the closest repositories |
//! | `gtrend stats` | Row counts and ingestion log |
//! | `gtrend analytics <view>` | Print chart data as JSON |
//! | `gtrend rate-limit` | Show the remaining GitHub API quota |
//! | `gtrend serve` | Start the HTTP API |
//! | `gtrend completions <shell>` | Print shell completions |

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use github_trend::commands::{self, AnalyticsView};
use github_trend::progress::ProgressMode;
use github_trend::{config, migrate, server, stats};

/// github-trend: collect, index and analyze popular GitHub repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gtrend.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "gtrend", version, about = "Collect, index and analyze popular GitHub repositories")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gtrend.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Discover repositories created in a date range.
    ///
    /// The range is split into weekly sub-windows per month so each
    /// search stays under the API's result cap.
    Discover {
        /// First creation date (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Last creation date, inclusive (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,

        /// Page cap per sub-window (overrides `github.max_pages`).
        #[arg(long)]
        max_pages: Option<u32>,

        /// Write skipped items as JSON lines to this file.
        #[arg(long)]
        errors: Option<PathBuf>,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Enrich discovered repositories and write their vector points.
    Enrich {
        /// Only repositories created on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Ignore the freshness window and refetch everything.
        #[arg(long)]
        renew: bool,

        /// Reuse cached READMEs for fresh repositories.
        #[arg(long)]
        no_readme: bool,

        /// Maximum number of repositories to process.
        #[arg(long)]
        limit: Option<i64>,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Semantic search over indexed repositories.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question using the closest repositories as context.
    Ask {
        question: String,

        /// Extra context appended to the prompt.
        #[arg(long)]
        context: Option<String>,
    },

    /// Show database statistics.
    Stats,

    /// Print chart data as JSON.
    Analytics {
        #[command(subcommand)]
        view: AnalyticsCommand,
    },

    /// Show the remaining GitHub API quota.
    RateLimit,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum AnalyticsCommand {
    /// Repositories per creation year.
    Years {
        #[arg(long, default_value_t = 100)]
        min_stars: i64,
        #[arg(long, default_value_t = 0)]
        min_forks: i64,
    },
    /// Language share per creation year.
    Languages {
        #[arg(long, default_value_t = 20)]
        top: i64,
        /// Print raw counts instead of percentages.
        #[arg(long)]
        counts: bool,
    },
    /// Topic frequencies.
    Topics {
        #[arg(long)]
        begin_year: Option<i32>,
        #[arg(long)]
        end_year: Option<i32>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Topic co-occurrence graph with communities.
    Communities,
    /// Fastest-growing repository created in a year.
    Growth {
        /// Defaults to the current year.
        #[arg(long)]
        year: Option<i32>,
    },
    /// Daily and cumulative stars of one repository.
    Stars {
        /// Repository as `owner/name`.
        repo: String,
    },
    /// Contributors ranked by total contributions.
    Contributors {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

impl From<AnalyticsCommand> for AnalyticsView {
    fn from(cmd: AnalyticsCommand) -> Self {
        match cmd {
            AnalyticsCommand::Years {
                min_stars,
                min_forks,
            } => AnalyticsView::Years {
                min_stars,
                min_forks,
            },
            AnalyticsCommand::Languages { top, counts } => AnalyticsView::Languages {
                top,
                percentage: !counts,
            },
            AnalyticsCommand::Topics {
                begin_year,
                end_year,
                limit,
            } => AnalyticsView::Topics {
                begin_year,
                end_year,
                limit,
            },
            AnalyticsCommand::Communities => AnalyticsView::Communities,
            AnalyticsCommand::Growth { year } => AnalyticsView::Growth { year },
            AnalyticsCommand::Stars { repo } => AnalyticsView::Stars { repo },
            AnalyticsCommand::Contributors { limit } => AnalyticsView::Contributors { limit },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "gtrend", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Discover {
            start,
            end,
            max_pages,
            errors,
            progress,
        } => {
            if end < start {
                anyhow::bail!("--end ({}) is before --start ({})", end, start);
            }
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_discover(&cfg, start, end, max_pages, errors.as_deref(), progress)
                .await?;
        }
        Commands::Enrich {
            since,
            renew,
            no_readme,
            limit,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_enrich(&cfg, since, renew, no_readme, limit, progress).await?;
        }
        Commands::Search { query, limit } => {
            commands::run_search(&cfg, &query, limit).await?;
        }
        Commands::Ask { question, context } => {
            commands::run_ask(&cfg, &question, context.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Analytics { view } => {
            commands::run_analytics(&cfg, view.into()).await?;
        }
        Commands::RateLimit => {
            commands::run_rate_limit(&cfg).await?;
        }
        Commands::Serve => {
            let state = commands::build_state(&cfg).await?;
            server::run_server(state).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
