//! Cortex - procedural knowledge consolidation engine
//!
//! CLI entry point with global panic handler.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cortex::cli::Workspace;
use cortex::config::{cortex_home, Config};
use cortex::core::{BulletKind, Pool};
use cortex::error::exit_codes;

// =============================================================================
// CLI Definition
// =============================================================================

/// Cortex - procedural knowledge consolidation engine
#[derive(Parser)]
#[command(name = "cortex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a bullet
    Add {
        /// Bullet text
        text: String,
        /// Target pool (left, right, shared)
        #[arg(long, short, default_value = "left")]
        pool: Pool,
        /// Bullet kind
        #[arg(long, default_value = "heuristic")]
        kind: BulletKind,
        /// Comma-separated tags
        #[arg(long, short)]
        tags: Option<String>,
        /// Initial confidence
        #[arg(long)]
        confidence: Option<f64>,
        /// Store as active instead of quarantined
        #[arg(long)]
        active: bool,
        /// Let the classifier pick left or right (pool becomes the hint)
        #[arg(long)]
        classify: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Retrieve bullets for a task
    Query {
        /// Task description
        text: String,
        /// Pool to search
        #[arg(long, short, default_value = "left")]
        pool: Pool,
        /// Number of own-pool results
        #[arg(long, short)]
        k: Option<usize>,
        /// Confidence floor
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,
        /// Skip the shared pool
        #[arg(long)]
        no_shared: bool,
        /// Comma-separated tags that must all match
        #[arg(long, short)]
        tags: Option<String>,
        /// Print a prompt-ready playbook
        #[arg(long)]
        playbook: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// List stored bullets
    List {
        /// Only this pool
        #[arg(long, short)]
        pool: Option<Pool>,
        /// Only this status (active, quarantined, deprecated)
        #[arg(long, short)]
        status: Option<String>,
        /// Maximum number of results
        #[arg(long, short)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Show pool statistics
    Stats {
        /// Include quality buckets and event counts
        #[arg(long, short)]
        detailed: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Record whether bullets helped
    Outcome {
        /// Bullet ids
        #[arg(required = true)]
        ids: Vec<String>,
        /// Mark as harmful instead of helpful
        #[arg(long)]
        harmful: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Find (and optionally merge) duplicate bullets
    Dedup {
        /// Only this pool
        #[arg(long, short)]
        pool: Option<Pool>,
        /// Similarity threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Minimum cluster size
        #[arg(long)]
        min_cluster_size: Option<usize>,
        /// Merge the clusters found
        #[arg(long)]
        merge: bool,
        /// Report a merge without applying it
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Remove low-value bullets from a pool
    Prune {
        /// Pool to prune
        pool: Pool,
        /// Policy (aggressive, balanced, conservative)
        #[arg(long)]
        policy: Option<String>,
        /// Only candidates flagged for this reason
        #[arg(long)]
        reason: Option<String>,
        /// Show candidates without removing them
        #[arg(long)]
        dry_run: bool,
        /// Prune past the confirmation threshold
        #[arg(long, short)]
        force: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Undo a prune from its backup
    Rollback {
        /// Backup id printed by prune
        backup_id: String,
        /// Pool the backup must belong to
        #[arg(long, short)]
        pool: Option<Pool>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// List prune backups and archived bullets
    Backups {
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Restore bullets archived by a merge
    Restore {
        /// Archived bullet ids
        #[arg(required = true)]
        ids: Vec<String>,
        /// Pool the bullets must belong to
        #[arg(long, short)]
        pool: Option<Pool>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Run or inspect scheduled maintenance
    Maintain {
        /// Action to perform
        #[command(subcommand)]
        action: MaintainAction,
        /// Run even when maintenance is disabled
        #[arg(long, short, global = true)]
        force: bool,
        /// Output as JSON
        #[arg(long, short, global = true)]
        json: bool,
        /// Suppress output
        #[arg(long, short, global = true)]
        quiet: bool,
    },

    /// Review cross-pool suggestions
    Suggestions {
        /// Action to perform
        #[command(subcommand)]
        action: SuggestionsAction,
        /// Output as JSON
        #[arg(long, short, global = true)]
        json: bool,
        /// Suppress output
        #[arg(long, short, global = true)]
        quiet: bool,
    },

    /// Suggest a bullet or text to another pool
    Teach {
        /// Source pool
        #[arg(long)]
        from: Pool,
        /// Target pool
        #[arg(long)]
        to: Pool,
        /// Existing bullet id to teach
        #[arg(long, conflicts_with = "text")]
        bullet: Option<String>,
        /// Free text to teach
        #[arg(long)]
        text: Option<String>,
        /// Comma-separated tags (free text only)
        #[arg(long, short)]
        tags: Option<String>,
        /// Soften absolute wording
        #[arg(long)]
        translate: bool,
        /// Why this is being taught
        #[arg(long)]
        reason: Option<String>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Deliver pending suggestions into their target pools
    Deliver {
        /// Only suggestions for this pool
        #[arg(long)]
        to: Option<Pool>,
        /// Maximum number to deliver
        #[arg(long, short)]
        limit: Option<usize>,
        /// Controller pressure to report
        #[arg(long, default_value_t = 0.0)]
        pressure: f64,
        /// Report the system as busy
        #[arg(long)]
        busy: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Show which pool the classifier would pick
    Classify {
        /// Text to classify
        text: String,
        /// Bullet kind
        #[arg(long, default_value = "heuristic")]
        kind: BulletKind,
        /// Pool used when the call is too close
        #[arg(long, default_value = "left")]
        hint: Pool,
        /// Comma-separated tags
        #[arg(long, short)]
        tags: Option<String>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Show or initialize configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: Option<ConfigAction>,
        /// Output as JSON
        #[arg(long, short, global = true)]
        json: bool,
        /// Suppress output
        #[arg(long, short, global = true)]
        quiet: bool,
    },
}

#[derive(Subcommand)]
enum MaintainAction {
    /// Run tasks now (deduplicate, prune, full)
    Run {
        /// Tasks to run; full when empty
        tasks: Vec<String>,
    },
    /// Run whatever is due
    Due,
    /// Show schedules and last runs
    Status,
}

#[derive(Subcommand)]
enum SuggestionsAction {
    /// List suggestions
    List {
        /// Only this status
        #[arg(long, short)]
        status: Option<String>,
        /// Only suggestions for this pool
        #[arg(long)]
        to: Option<Pool>,
    },
    /// Accept a suggestion
    Accept {
        id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Reject a suggestion
    Reject {
        id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Expire old active suggestions
    Expire {
        /// Age in days; the configured expiry when unset
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write it to .cortex/config.toml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    setup_panic_handler();
    init_tracing();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("cortex error: {}", e);
            ExitCode::from(exit_codes::FAILURE as u8)
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Set up the global panic handler.
///
/// On panic, logs to the cortex home crash.log and exits with the failure code.
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("cortex panic: {}", info);

        if let Some(home) = cortex_home() {
            let crash_log = home.join("crash.log");
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::FAILURE);
    }));
}

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

/// Run the CLI and return the exit code.
async fn run() -> CliResult {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let config = Config::load_from_cwd(&cwd);
    let open = || Workspace::open(config.clone());

    match cli.command {
        Commands::Config {
            action,
            json,
            quiet,
        } => run_config(config.clone(), &cwd, action, json, quiet),
        Commands::Add {
            text,
            pool,
            kind,
            tags,
            confidence,
            active,
            classify,
            json,
            quiet,
        } => {
            use cortex::cli::add::{AddCommand, AddOptions};
            let workspace = open()?;
            let cmd = AddCommand::new(&workspace);
            let options = AddOptions {
                json,
                quiet,
                kind,
                tags: tags_arg(tags),
                confidence,
                active,
                classify,
                ..AddOptions::new(text, pool)
            };
            let output = cmd.run(&options).await;
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Query {
            text,
            pool,
            k,
            min_confidence,
            no_shared,
            tags,
            playbook,
            json,
            quiet,
        } => {
            use cortex::cli::query::{QueryCommand, QueryOptions};
            let workspace = open()?;
            let cmd = QueryCommand::new(&workspace);
            let options = QueryOptions {
                json,
                quiet,
                k,
                min_confidence,
                no_shared,
                tags: tags_arg(tags),
                playbook,
                ..QueryOptions::new(text, pool)
            };
            let output = cmd.run(&options).await;
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::List {
            pool,
            status,
            limit,
            json,
            quiet,
        } => {
            use cortex::cli::list::{ListCommand, ListOptions};
            let workspace = open()?;
            let cmd = ListCommand::new(&workspace);
            let options = ListOptions {
                json,
                quiet,
                pool,
                status,
                limit,
            };
            let output = cmd.run(&options);
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Stats {
            detailed,
            json,
            quiet,
        } => {
            use cortex::cli::stats::{StatsCommand, StatsOptions};
            let workspace = open()?;
            let cmd = StatsCommand::new(&workspace);
            let options = StatsOptions {
                json,
                quiet,
                detailed,
            };
            let output = cmd.run(&options).await;
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Outcome {
            ids,
            harmful,
            json,
            quiet,
        } => {
            use cortex::cli::outcome::{OutcomeCommand, OutcomeOptions};
            let workspace = open()?;
            let cmd = OutcomeCommand::new(&workspace);
            let options = OutcomeOptions {
                json,
                quiet,
                ids,
                harmful,
            };
            let output = cmd.run(&options);
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Dedup {
            pool,
            threshold,
            min_cluster_size,
            merge,
            dry_run,
            json,
            quiet,
        } => {
            use cortex::cli::dedup::{DedupCommand, DedupOptions};
            let workspace = open()?;
            let cmd = DedupCommand::new(&workspace);
            let options = DedupOptions {
                json,
                quiet,
                pool,
                threshold,
                min_cluster_size,
                merge,
                dry_run,
            };
            let output = cmd.run(&options).await;
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Prune {
            pool,
            policy,
            reason,
            dry_run,
            force,
            json,
            quiet,
        } => {
            use cortex::cli::prune::{PruneCommand, PruneOptions};
            let workspace = open()?;
            let cmd = PruneCommand::new(&workspace);
            let options = PruneOptions {
                json,
                quiet,
                policy,
                reason,
                dry_run,
                force,
                ..PruneOptions::new(pool)
            };
            let output = cmd.run(&options);
            let formatted = cmd.format_output(&output, &options);
            if output.confirmation_required {
                if !formatted.is_empty() {
                    println!("{}", formatted);
                }
                return Ok(ExitCode::from(exit_codes::CONFIRMATION_REQUIRED as u8));
            }
            Ok(emit(formatted, output.success))
        }
        Commands::Rollback {
            backup_id,
            pool,
            json,
            quiet,
        } => run_recovery(
            &open()?,
            cortex::cli::restore::RecoveryAction::Rollback { backup_id },
            pool,
            json,
            quiet,
        )
        .await,
        Commands::Backups { json, quiet } => run_recovery(
            &open()?,
            cortex::cli::restore::RecoveryAction::Backups,
            None,
            json,
            quiet,
        )
        .await,
        Commands::Restore {
            ids,
            pool,
            json,
            quiet,
        } => run_recovery(
            &open()?,
            cortex::cli::restore::RecoveryAction::Restore { ids },
            pool,
            json,
            quiet,
        )
        .await,
        Commands::Maintain {
            action,
            force,
            json,
            quiet,
        } => {
            use cortex::cli::maintain::{
                MaintainAction as MaintainActionLib, MaintainCommand, MaintainOptions,
            };
            let workspace = open()?;
            let cmd = MaintainCommand::new(&workspace);
            let options = MaintainOptions { json, quiet, force };
            let action = match action {
                MaintainAction::Run { tasks } => MaintainActionLib::Run { tasks },
                MaintainAction::Due => MaintainActionLib::Due,
                MaintainAction::Status => MaintainActionLib::Status,
            };
            let output = cmd.run(&action, &options).await;
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Suggestions {
            action,
            json,
            quiet,
        } => {
            use cortex::cli::suggestions::{
                SuggestionsAction as SuggestionsActionLib, SuggestionsCommand, SuggestionsOptions,
            };
            let workspace = open()?;
            let cmd = SuggestionsCommand::new(&workspace);
            let options = SuggestionsOptions { json, quiet };
            let action = match action {
                SuggestionsAction::List { status, to } => SuggestionsActionLib::List {
                    status,
                    to_pool: to,
                },
                SuggestionsAction::Accept { id, reason } => {
                    SuggestionsActionLib::Accept { id, reason }
                }
                SuggestionsAction::Reject { id, reason } => {
                    SuggestionsActionLib::Reject { id, reason }
                }
                SuggestionsAction::Expire { days } => SuggestionsActionLib::Expire { days },
            };
            let output = cmd.run(&action, &options);
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Teach {
            from,
            to,
            bullet,
            text,
            tags,
            translate,
            reason,
            json,
            quiet,
        } => {
            use cortex::cli::teach::{TeachCommand, TeachOptions};
            let workspace = open()?;
            let cmd = TeachCommand::new(&workspace);
            let options = TeachOptions {
                json,
                quiet,
                bullet_id: bullet,
                text,
                tags: tags_arg(tags),
                translate,
                reason,
                ..TeachOptions::new(from, to)
            };
            let output = cmd.run(&options);
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Deliver {
            to,
            limit,
            pressure,
            busy,
            json,
            quiet,
        } => {
            use cortex::cli::deliver::{DeliverCommand, DeliverOptions};
            let workspace = open()?;
            let cmd = DeliverCommand::new(&workspace);
            let options = DeliverOptions {
                json,
                quiet,
                to_pool: to,
                limit,
                pressure,
                busy,
            };
            let output = cmd.run(&options).await;
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
        Commands::Classify {
            text,
            kind,
            hint,
            tags,
            json,
            quiet,
        } => {
            use cortex::cli::classify::{ClassifyCommand, ClassifyOptions};
            let workspace = open()?;
            let cmd = ClassifyCommand::new(&workspace);
            let options = ClassifyOptions {
                json,
                quiet,
                kind,
                hint,
                tags: tags_arg(tags),
                ..ClassifyOptions::new(text)
            };
            let output = cmd.run(&options);
            Ok(emit(cmd.format_output(&output, &options), output.success))
        }
    }
}

// =============================================================================
// Command Helpers
// =============================================================================

/// Print formatted output (if any) and map success to an exit code.
fn emit(formatted: String, success: bool) -> ExitCode {
    if !formatted.is_empty() {
        println!("{}", formatted);
    }
    success_to_exit_code(success)
}

/// Convert a success boolean to an exit code.
fn success_to_exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::from(exit_codes::SUCCESS as u8)
    } else {
        ExitCode::from(exit_codes::FAILURE as u8)
    }
}

fn tags_arg(raw: Option<String>) -> Vec<String> {
    raw.as_deref().map(cortex::cli::parse_tags).unwrap_or_default()
}

async fn run_recovery(
    workspace: &Workspace,
    action: cortex::cli::restore::RecoveryAction,
    pool: Option<Pool>,
    json: bool,
    quiet: bool,
) -> CliResult {
    use cortex::cli::restore::{RestoreCommand, RestoreOptions};
    let cmd = RestoreCommand::new(workspace);
    let options = RestoreOptions { json, quiet, pool };
    let output = cmd.run(&action, &options).await;
    Ok(emit(cmd.format_output(&output, &options), output.success))
}

fn run_config(
    config: Config,
    cwd: &Path,
    action: Option<ConfigAction>,
    json: bool,
    quiet: bool,
) -> CliResult {
    use cortex::cli::config_cmd::{ConfigAction as ConfigActionLib, ConfigCommand, ConfigOptions};
    let cmd = ConfigCommand::new(config, cwd);
    let options = ConfigOptions { json, quiet };
    let action = match action {
        None | Some(ConfigAction::Show) => ConfigActionLib::Show,
        Some(ConfigAction::Init { force }) => ConfigActionLib::Init { force },
    };
    let output = cmd.run(&action, &options);
    Ok(emit(cmd.format_output(&output, &options), output.success))
}

// =============================================================================
// Tests
// =============================================================================
