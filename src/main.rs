//! # Keepsake CLI
//!
//! Memory-resurfacing SMS service: save short entries, get one texted
//! back every day at a random moment inside your quiet window.
//!
//! Usage:
//!   keepsake run                        # Scheduler + webhook gateway
//!   keepsake tick                       # Run a single scheduler tick
//!   keepsake user add --phone +1555...  # Register a user
//!   keepsake entry add <user> "text"    # Save an entry
//!   keepsake config show                # Show configuration

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use keepsake_channels::sms::SmsGateway;
use keepsake_core::traits::{EntryStore, OccasionStore, Transport, UserStore};
use keepsake_core::types::{Entitlement, Entry, User};
use keepsake_core::KeepsakeConfig;
use keepsake_gateway::AppState;
use keepsake_scheduler::{DispatchCoordinator, OptOutReconciler, SchedulerEngine};
use keepsake_store::SqliteStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "keepsake",
    version,
    about = "Keepsake — your saved moments, texted back to you",
    long_about = "Save short text entries and get one sent back over SMS every day, \
at a random moment inside your quiet window."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler loop and webhook gateway
    Run,

    /// Run a single scheduler tick and print the summary
    Tick,

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage saved entries
    Entry {
        #[command(subcommand)]
        action: EntryAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a user
    Add {
        /// Destination phone number (E.164)
        #[arg(long)]
        phone: String,

        /// IANA timezone identifier
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Weekly send quota (0-20)
        #[arg(long, default_value_t = 7)]
        quota: u8,

        /// First hour of the quiet window (0-23)
        #[arg(long, default_value_t = 9)]
        window_start: u8,

        /// Last hour of the quiet window (0-23)
        #[arg(long, default_value_t = 21)]
        window_end: u8,

        /// Mark the subscription entitlement active
        #[arg(long)]
        active: bool,

        /// Grant a trial for this many days
        #[arg(long)]
        trial_days: Option<i64>,
    },
    /// List users
    List,
    /// Suppress deliveries for a user
    OptOut { user_id: String },
    /// Re-enable deliveries for a user
    Resubscribe { user_id: String },
}

#[derive(Subcommand)]
enum EntryAction {
    /// Save an entry for a user
    Add { user_id: String, body: String },
    /// List a user's entries
    List { user_id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "keepsake=debug,keepsake_scheduler=debug,keepsake_gateway=debug,keepsake_store=debug"
    } else {
        "keepsake=info,keepsake_scheduler=info,keepsake_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Load config
    let config = if let Some(path) = &cli.config {
        KeepsakeConfig::load_from(std::path::Path::new(path))?
    } else {
        KeepsakeConfig::load()?
    };

    match cli.command {
        Commands::Run => {
            let store = Arc::new(SqliteStore::open(&config.db_path())?);
            let coordinator = Arc::new(build_coordinator(&config, &store));
            let engine = SchedulerEngine::new(
                Arc::clone(&coordinator),
                config.scheduler.tick_interval_secs,
            );
            let state = AppState {
                coordinator,
                reconciler: Arc::new(OptOutReconciler::new(
                    store.clone() as Arc<dyn UserStore>
                )),
                users: store.clone() as Arc<dyn UserStore>,
            };

            println!("📨 Keepsake v{} — scheduler running", env!("CARGO_PKG_VERSION"));
            println!("   Gateway: http://{}", config.gateway.bind);
            println!("   Press Ctrl+C to stop.");

            tokio::select! {
                _ = engine.run() => {}
                result = keepsake_gateway::serve(state, &config.gateway.bind) => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\n👋 Keepsake stopped.");
                }
            }
        }

        Commands::Tick => {
            let store = Arc::new(SqliteStore::open(&config.db_path())?);
            let coordinator = build_coordinator(&config, &store);
            let summary = coordinator.run_tick(chrono::Utc::now()).await;
            println!("Tick complete: {summary}");
        }

        Commands::User { action } => {
            let store = Arc::new(SqliteStore::open(&config.db_path())?);
            match action {
                UserAction::Add {
                    phone,
                    timezone,
                    quota,
                    window_start,
                    window_end,
                    active,
                    trial_days,
                } => {
                    let mut user = User::new(phone, timezone);
                    user.weekly_quota = quota;
                    user.window_start_hour = window_start;
                    user.window_end_hour = window_end;
                    user.entitlement = Entitlement {
                        active,
                        trial_ends_at: trial_days
                            .map(|d| chrono::Utc::now() + chrono::Duration::days(d)),
                    };
                    if !user.window_is_valid() {
                        anyhow::bail!(
                            "invalid quiet window [{window_start}, {window_end}] or quota {quota}"
                        );
                    }
                    store.add_user(&user).await?;
                    println!("✅ User added: {}", user.id);
                }
                UserAction::List => {
                    let users = store.list_users().await?;
                    if users.is_empty() {
                        println!("No users yet. Add one with: keepsake user add --phone +1555...");
                    }
                    for user in users {
                        println!(
                            "{}  {}  {}  window [{}, {}]  quota {}/wk  {}{}",
                            user.id,
                            user.phone,
                            user.timezone,
                            user.window_start_hour,
                            user.window_end_hour,
                            user.weekly_quota,
                            if user.entitlement.active { "active" } else { "inactive" },
                            if user.opted_out { "  ⛔ opted out" } else { "" },
                        );
                    }
                }
                UserAction::OptOut { user_id } => {
                    let reconciler = OptOutReconciler::new(store.clone() as Arc<dyn UserStore>);
                    reconciler.report_opt_out(&user_id).await?;
                    println!("⛔ Deliveries suppressed for {user_id}");
                }
                UserAction::Resubscribe { user_id } => {
                    let reconciler = OptOutReconciler::new(store.clone() as Arc<dyn UserStore>);
                    reconciler.report_resubscribe(&user_id).await?;
                    println!("✅ Deliveries re-enabled for {user_id}");
                }
            }
        }

        Commands::Entry { action } => {
            let store = Arc::new(SqliteStore::open(&config.db_path())?);
            match action {
                EntryAction::Add { user_id, body } => {
                    if store.get_user(&user_id).await?.is_none() {
                        anyhow::bail!("no such user: {user_id}");
                    }
                    let entry = Entry::new(user_id, body);
                    store.add_entry(&entry).await?;
                    println!("✅ Entry saved: {}", entry.id);
                }
                EntryAction::List { user_id } => {
                    let entries = store.list_entries(&user_id).await?;
                    if entries.is_empty() {
                        println!("No entries yet.");
                    }
                    for entry in entries {
                        let status = match entry.sent_at {
                            Some(at) => format!("sent {}", at.format("%Y-%m-%d")),
                            None => "unsent".to_string(),
                        };
                        println!("{}  [{}]  {}", entry.id, status, entry.body);
                    }
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                println!("\nConfig file: {}", KeepsakeConfig::default_path().display());
                println!("Database:    {}", config.db_path().display());
            }
            ConfigAction::Reset => {
                KeepsakeConfig::default().save()?;
                println!("✅ Config reset: {}", KeepsakeConfig::default_path().display());
            }
        },
    }

    Ok(())
}

fn build_coordinator(config: &KeepsakeConfig, store: &Arc<SqliteStore>) -> DispatchCoordinator {
    let transport = Arc::new(SmsGateway::new(config.transport.clone()));
    DispatchCoordinator::new(
        store.clone() as Arc<dyn UserStore>,
        store.clone() as Arc<dyn EntryStore>,
        store.clone() as Arc<dyn OccasionStore>,
        transport as Arc<dyn Transport>,
        config.scheduler.clone(),
    )
}
