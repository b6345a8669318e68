//! # Newsroom CLI (`newsroom`)
//!
//! ## Usage
//!
//! ```bash
//! newsroom --config ./config/newsroom.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `newsroom init` | Create the SQLite database and run schema migrations |
//! | `newsroom sources list\|add\|remove\|validate\|enable\|disable` | Manage feed sources |
//! | `newsroom refresh [--source KEY]` | Fetch feeds and ingest new entries |
//! | `newsroom crawl one ID\|backlog` | Extract article bodies |
//! | `newsroom enrich one ID\|backlog` | Summarize, classify and embed |
//! | `newsroom translate ID` | Structured translation of one article |
//! | `newsroom embed pending` | Backfill missing embeddings |
//! | `newsroom search "<query>"` | Filtered scan or semantic search |
//! | `newsroom trending` | Top records by importance |
//! | `newsroom tasks list\|add\|remove\|run` | Scheduled tasks |
//! | `newsroom models list\|add\|remove\|assign` | AI model configuration |
//! | `newsroom serve` | HTTP API plus the scheduler |
//! | `newsroom completions SHELL` | Shell completion script |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level);
//! command results go to stdout.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use newsroom::config;
use newsroom::context::AppContext;
use newsroom::search::SearchParams;
use newsroom::settings::{self, ModelConfig, Role};
use newsroom::tasks::{self, TaskInput, TaskType};
use newsroom::{crawl, enrich, ingest, migrate, search, server, sources};
use newsroom_core::models::NewSource;

/// Newsroom: feed ingestion, article extraction, AI enrichment and hybrid
/// search for a news corpus.
#[derive(Parser)]
#[command(name = "newsroom", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/newsroom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage feed sources.
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Refresh enabled sources, or one source.
    Refresh {
        #[arg(long)]
        source: Option<String>,
    },

    /// Extract full article content.
    Crawl {
        #[command(subcommand)]
        action: BatchAction,
    },

    /// Run AI enrichment.
    Enrich {
        #[command(subcommand)]
        action: BatchAction,

        /// Sentences in the summary (overrides settings).
        #[arg(long, global = true)]
        summary_length: Option<u32>,
    },

    /// Translate one record's article into the target language.
    Translate {
        id: i64,
        /// Defaults to `ai.target_language`.
        #[arg(long)]
        language: Option<String>,
    },

    /// Embedding management.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Search the corpus. Without a query, lists newest first.
    Search {
        query: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        ai_category: Option<String>,
        /// Only records bookmarked by `--viewer`.
        #[arg(long)]
        bookmarked: bool,
        #[arg(long)]
        viewer: Option<String>,
        /// Only records published on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        page_size: Option<i64>,
    },

    /// Top records by importance, then recency.
    Trending {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Scheduled tasks.
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// AI model configuration and role assignment.
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Start the HTTP API and the scheduler.
    Serve,

    /// Print a shell completion script.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum SourceAction {
    List,
    /// Validate the feed, then register it.
    Add {
        #[arg(long)]
        key: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Remove a source and every record ingested from it.
    Remove { key: String },
    /// Check whether a URL serves an RSS or Atom feed.
    Validate { url: String },
    Enable { key: String },
    Disable { key: String },
}

#[derive(Subcommand)]
enum BatchAction {
    /// One content record.
    One { id: i64 },
    /// The pending backlog.
    Backlog,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed processed records that have no vector yet.
    Pending,
}

#[derive(Subcommand)]
enum TaskAction {
    List,
    Add {
        #[arg(long)]
        name: String,
        /// feed-refresh, ai-enrich, crawl-backlog or embedding-backfill.
        #[arg(long = "type", value_parser = TaskType::parse)]
        task_type: TaskType,
        /// 5- or 6-field cron expression.
        #[arg(long)]
        cron: String,
        #[arg(long)]
        disabled: bool,
    },
    Remove { id: i64 },
    /// Run a task now, with status bookkeeping.
    Run { id: i64 },
}

#[derive(Subcommand)]
enum ModelAction {
    List,
    Add {
        #[arg(long)]
        name: String,
        /// `gemini`/`google`, or any OpenAI-compatible provider name.
        #[arg(long)]
        provider: String,
        #[arg(long, value_parser = Role::parse)]
        role: Role,
        #[arg(long)]
        model: String,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        /// Also make it the active model for its role.
        #[arg(long)]
        assign: bool,
    },
    Remove { id: i64 },
    /// Point a role at a model id, or clear it without one.
    Assign {
        #[arg(value_parser = Role::parse)]
        role: Role,
        id: Option<i64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_since(s: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid --since date '{}', expected YYYY-MM-DD", s))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .context("invalid --since date")?
        .and_utc()
        .timestamp())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "newsroom", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = migrate::run_migrations(&cfg).await?;
        pool.close().await;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let ctx = AppContext::open(cfg).await?;

    match cli.command {
        Commands::Init | Commands::Completions { .. } => {}
        Commands::Sources { action } => match action {
            SourceAction::List => {
                let list = sources::list_sources(&ctx.pool).await?;
                if list.is_empty() {
                    println!("No sources.");
                }
                for s in list {
                    println!(
                        "{:<20} {:<8} {:<30} {}",
                        s.key,
                        if s.enabled { "enabled" } else { "disabled" },
                        s.name,
                        s.url
                    );
                }
            }
            SourceAction::Add {
                key,
                name,
                url,
                category,
            } => {
                let new = NewSource {
                    key,
                    name,
                    url,
                    category,
                    owner: None,
                };
                print_json(&sources::add_source(&ctx.pool, &ctx.feeds, &new).await?)?;
            }
            SourceAction::Remove { key } => {
                print_json(&sources::remove_source(&ctx.pool, ctx.store.as_ref(), &key).await?)?;
            }
            SourceAction::Validate { url } => {
                print_json(&ctx.feeds.validate(&url).await?)?;
            }
            SourceAction::Enable { key } => {
                sources::set_enabled(&ctx.pool, &key, true).await?;
                println!("Enabled {}.", key);
            }
            SourceAction::Disable { key } => {
                sources::set_enabled(&ctx.pool, &key, false).await?;
                println!("Disabled {}.", key);
            }
        },
        Commands::Refresh { source } => {
            print_json(&ingest::refresh_all(&ctx, source.as_deref()).await?)?;
        }
        Commands::Crawl { action } => match action {
            BatchAction::One { id } => print_json(&crawl::crawl_record(&ctx, id).await?)?,
            BatchAction::Backlog => print_json(&crawl::crawl_backlog(&ctx).await?)?,
        },
        Commands::Enrich {
            action,
            summary_length,
        } => match action {
            BatchAction::One { id } => print_json(&enrich::enrich_record(&ctx, id, summary_length).await?)?,
            BatchAction::Backlog => {
                let report = enrich::enrich_backlog(&ctx).await?;
                print_json(&report)?;
                // The spawned backfill is cut short when the process exits.
                if report.processed > 0 {
                    if let Err(e) = enrich::embedding_backfill(&ctx).await {
                        tracing::warn!(error = %format!("{:#}", e), "embedding backfill skipped");
                    }
                }
            }
        },
        Commands::Translate { id, language } => {
            print_json(&enrich::translate_record(&ctx, id, language.as_deref()).await?)?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending => print_json(&enrich::embedding_backfill(&ctx).await?)?,
        },
        Commands::Search {
            query,
            source,
            category,
            ai_category,
            bookmarked,
            viewer,
            since,
            page,
            page_size,
        } => {
            let params = SearchParams {
                q: query,
                source,
                category,
                ai_category,
                bookmarked,
                since: since.as_deref().map(parse_since).transpose()?,
                page,
                page_size,
            };
            print_json(&search::search(&ctx, &params, viewer.as_deref()).await?)?;
        }
        Commands::Trending { limit } => {
            print_json(&search::trending(&ctx, limit).await?)?;
        }
        Commands::Tasks { action } => match action {
            TaskAction::List => print_json(&tasks::list_tasks(&ctx.pool).await?)?,
            TaskAction::Add {
                name,
                task_type,
                cron,
                disabled,
            } => {
                let input = TaskInput {
                    name,
                    task_type,
                    cron,
                    enabled: !disabled,
                    config: None,
                };
                print_json(&tasks::create_task(&ctx.pool, &input).await?)?;
            }
            TaskAction::Remove { id } => {
                tasks::delete_task(&ctx.pool, id).await?;
                println!("Removed task {}.", id);
            }
            TaskAction::Run { id } => print_json(&tasks::run_task_now(&ctx, id).await?)?,
        },
        Commands::Models { action } => match action {
            ModelAction::List => print_json(&settings::list_models(&ctx.pool).await?)?,
            ModelAction::Add {
                name,
                provider,
                role,
                model,
                base_url,
                api_key,
                temperature,
                assign,
            } => {
                let m = ModelConfig {
                    id: 0,
                    name,
                    provider,
                    role,
                    base_url,
                    api_key,
                    model,
                    temperature,
                    enabled: true,
                };
                let id = settings::add_model(&ctx.pool, &m).await?;
                if assign {
                    settings::assign_role(&ctx.pool, role, Some(id)).await?;
                }
                println!("Added model {}.", id);
            }
            ModelAction::Remove { id } => {
                if settings::remove_model(&ctx.pool, id).await? {
                    println!("Removed model {}.", id);
                } else {
                    println!("No model {}.", id);
                }
            }
            ModelAction::Assign { role, id } => {
                settings::assign_role(&ctx.pool, role, id).await?;
                match id {
                    Some(id) => println!("Assigned model {} to {}.", id, role.as_str()),
                    None => println!("Cleared {}.", role.as_str()),
                }
            }
        },
        Commands::Serve => server::run_server(ctx).await?,
    }

    Ok(())
}
