use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use skillsmith_catalog::CatalogStore;
use skillsmith_core::model::{InstallPriority, SyncFrequency, TrustTier, DEFAULT_EMBEDDING_DIM};
use skillsmith_mcp::SkillsmithMcpServer;
use skillsmith_runtime::recommend::RecommendOptions;
use skillsmith_runtime::search::{SearchFilters, SearchSort, SortDirection, SortField};

mod config;

/// Thin CLI over the Skillsmith catalog and runtime. Argument-parsing
/// sophistication is deliberately minimal here - the real surface is the
/// library crates this binary calls into.
#[derive(Parser)]
#[command(name = "skillsmith")]
#[command(about = "Skillsmith - skill discovery and personalization for AI agents", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the catalog's sqlite database (default: ~/.skillsmith/catalog.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the skill catalog
    Search {
        query: String,
        #[arg(long)]
        category: Vec<String>,
        #[arg(long)]
        technology: Vec<String>,
        #[arg(long, value_enum)]
        trust_tier: Option<TrustTierArg>,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        has_tests: Option<bool>,
        #[arg(long)]
        has_examples: Option<bool>,
        #[arg(long, value_enum, default_value = "relevance")]
        sort: SortFieldArg,
        #[arg(long, value_enum, default_value = "desc")]
        direction: SortDirectionArg,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Show full detail for one skill
    Get { skill_id: String },
    /// Detect the technology stack at a path
    Analyze {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },
    /// Recommend skills for the stack detected at a path
    Recommend {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long, default_value_t = 10)]
        max_results: u32,
    },
    /// Install a skill
    Install {
        skill_id: String,
        #[arg(short, long)]
        force: bool,
        #[arg(long)]
        target_directory: Option<String>,
    },
    /// Remove an installed skill
    #[command(alias = "rm")]
    Uninstall { skill_id: String },
    /// List installed skills
    #[command(alias = "ls")]
    List,
    /// Check a skill for conflicts against what's installed
    Conflicts { skill_id: String },
    /// Estimate character budget for a set of skills
    Budget {
        skill_ids: Vec<String>,
        #[arg(long)]
        include_current: bool,
    },
    /// Set an installed skill's priority
    Priority {
        skill_id: String,
        #[arg(value_enum)]
        priority: PriorityArg,
        #[arg(long)]
        lock: bool,
    },
    /// Add or remove a skill from the blocklist
    Blocklist {
        #[command(subcommand)]
        action: BlocklistAction,
    },
    /// Show sync configuration and run history
    SyncStatus,
    /// Run an incremental sync against configured sources
    Sync,
    /// Start the MCP server on stdio
    Serve,
}

#[derive(Subcommand)]
enum BlocklistAction {
    Add { skill_id: String, reason: Option<String> },
    Remove { skill_id: String },
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum PriorityArg {
    Essential,
    Recommended,
    Optional,
}

impl From<PriorityArg> for InstallPriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Essential => InstallPriority::Essential,
            PriorityArg::Recommended => InstallPriority::Recommended,
            PriorityArg::Optional => InstallPriority::Optional,
        }
    }
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum TrustTierArg {
    Unverified,
    Experimental,
    Community,
    Verified,
    Official,
}

impl From<TrustTierArg> for TrustTier {
    fn from(value: TrustTierArg) -> Self {
        match value {
            TrustTierArg::Unverified => TrustTier::Unverified,
            TrustTierArg::Experimental => TrustTier::Experimental,
            TrustTierArg::Community => TrustTier::Community,
            TrustTierArg::Verified => TrustTier::Verified,
            TrustTierArg::Official => TrustTier::Official,
        }
    }
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum SortFieldArg {
    Relevance,
    Score,
    Stars,
    Updated,
}

impl From<SortFieldArg> for SortField {
    fn from(value: SortFieldArg) -> Self {
        match value {
            SortFieldArg::Relevance => SortField::Relevance,
            SortFieldArg::Score => SortField::Score,
            SortFieldArg::Stars => SortField::Stars,
            SortFieldArg::Updated => SortField::Updated,
        }
    }
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum SortDirectionArg {
    Asc,
    Desc,
}

impl From<SortDirectionArg> for SortDirection {
    fn from(value: SortDirectionArg) -> Self {
        match value {
            SortDirectionArg::Asc => SortDirection::Asc,
            SortDirectionArg::Desc => SortDirection::Desc,
        }
    }
}

fn db_path(cli_db: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_db {
        return Ok(path);
    }
    let home = dirs::home_dir().context("could not determine home directory")?;
    let dir = home.join(".skillsmith");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("catalog.db"))
}

fn print_response<T: serde::Serialize>(response: skillsmith_mcp::response::ApiResponse<T>) -> Result<()> {
    if response.success {
        println!("{}", serde_json::to_string_pretty(&response.data)?);
        Ok(())
    } else {
        let error = response.error.unwrap();
        eprintln!("{} {}", "Error:".red().bold(), error.message);
        for suggestion in &error.recovery_suggestions {
            eprintln!("  {} {}", "->".dimmed(), suggestion);
        }
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let home = dirs::home_dir().context("could not determine home directory")?;
    let log_dir = home.join(".skillsmith").join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "skillsmith.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Stdout stays reserved for `serve`'s stdio JSON-RPC transport, so all
    // tracing output goes to stderr and the rolling file only.
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    let config = config::SkillsmithConfig::load_or_default(None)?;

    let db_path = db_path(cli.db)?;
    let catalog = Arc::new(
        CatalogStore::open(&db_path.to_string_lossy(), DEFAULT_EMBEDDING_DIM)
            .await
            .with_context(|| format!("failed to open catalog at {}", db_path.display()))?,
    );
    let server = SkillsmithMcpServer::new(catalog);

    let frequency = if config.sync.frequency.eq_ignore_ascii_case("weekly") {
        SyncFrequency::Weekly
    } else {
        SyncFrequency::Daily
    };
    server.apply_sync_config(frequency, config.sync.enabled).await?;

    match cli.command {
        Commands::Search {
            query,
            category,
            technology,
            trust_tier,
            min_score,
            source,
            has_tests,
            has_examples,
            sort,
            direction,
            limit,
        } => {
            let filters = SearchFilters {
                categories: category,
                technologies: technology,
                trust_tier: trust_tier.map(Into::into),
                min_score,
                source,
                updated_after: None,
                has_tests,
                has_examples,
            };
            let sort = SearchSort { field: sort.into(), direction: direction.into() };
            print_response(server.search(&query, filters, sort, limit, 0).await)
        }
        Commands::Get { skill_id } => print_response(server.get_skill(&skill_id).await),
        Commands::Analyze { path, depth } => print_response(server.analyze_codebase(&path, depth)),
        Commands::Recommend { path, max_results } => {
            let options = RecommendOptions { max_results, ..Default::default() };
            print_response(server.recommend_skills(&path, options).await)
        }
        Commands::Install { skill_id, force, target_directory } => {
            let target = target_directory.unwrap_or_else(|| format!("./skills/{skill_id}"));
            print_response(server.install_skill(&skill_id, force, &target).await)
        }
        Commands::Uninstall { skill_id } => print_response(server.uninstall_skill(&skill_id).await),
        Commands::List => print_response(server.list_installed().await),
        Commands::Conflicts { skill_id } => print_response(server.check_conflicts(&skill_id, true, &[]).await),
        Commands::Budget { skill_ids, include_current } => {
            print_response(server.estimate_budget(&skill_ids, include_current).await)
        }
        Commands::Priority { skill_id, priority, lock } => {
            print_response(server.set_priority(&skill_id, priority.into(), lock).await)
        }
        Commands::Blocklist { action } => match action {
            BlocklistAction::Add { skill_id, reason } => {
                print_response(server.update_blocklist("add", Some(&skill_id), reason.as_deref()).await)
            }
            BlocklistAction::Remove { skill_id } => {
                print_response(server.update_blocklist("remove", Some(&skill_id), None).await)
            }
        },
        Commands::SyncStatus => print_response(server.get_sync_status().await),
        Commands::Sync => print_response(server.refresh_index().await),
        Commands::Serve => skillsmith_mcp::run(server).await,
    }
}
