use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vastnet_db::init_db;
use vastnet_db::models::page::DEFAULT_PER_PAGE;
use vastnet_shared::Multiplier;

use vastnet_ledger::services::notification_service::{LogNotifier, Notifier, TelegramNotifier};
use vastnet_ledger::{AppState, Config, LedgerError, LedgerResult, cli, settings};

#[derive(Parser)]
#[command(name = "vastnet-ledger")]
#[command(about = "VastNet VPN storefront ledger: balances, payments, subscriptions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the plan catalog
    Plans,
    /// Register a user (idempotent) and show their account
    User {
        tg_id: i64,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        referrer: Option<i64>,
    },
    /// Validate a top-up and print the invoice to issue
    Deposit { tg_id: i64, amount: String },
    /// Pre-checkout check for a provider total in minor units
    Authorize {
        tg_id: i64,
        provider_total: i64,
        #[arg(long)]
        currency: Option<String>,
    },
    /// Record a captured payment
    Settle {
        tg_id: i64,
        amount: i64,
        provider_id: String,
        #[arg(long)]
        currency: Option<String>,
    },
    /// Buy a plan from the balance
    Purchase { tg_id: i64, plan_id: i64 },
    /// Renew a subscription for another period
    Renew { tg_id: i64, subscription_id: i64 },
    /// Toggle auto-renewal of one's own subscription
    Toggle { tg_id: i64, subscription_id: i64 },
    /// Administrative tools
    Admin {
        /// Telegram id of the acting administrator
        #[arg(long = "as", value_name = "TG_ID")]
        acting_id: i64,
        #[command(subcommand)]
        subcommand: AdminCommands,
    },
    /// Paginated listings
    List {
        /// Telegram id of the acting administrator
        #[arg(long = "as", value_name = "TG_ID")]
        acting_id: i64,
        #[command(subcommand)]
        subcommand: ListCommands,
    },
    /// Report users whose balance disagrees with their payments
    Audit,
    /// Run the auto-renewal loop until Ctrl-C
    Worker {
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
        #[arg(long, default_value_t = 24)]
        window_hours: u64,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Set a balance, recording the difference as an adjustment
    SetBalance { tg_id: i64, balance: i64 },
    /// Expire a subscription now
    Expire { subscription_id: i64 },
    /// Toggle auto-renewal of any subscription
    Toggle { subscription_id: i64 },
    /// Set or clear per-referrer bonus multipliers
    Referrer {
        tg_id: i64,
        #[arg(long, value_parser = cli::parse_multiplier)]
        first: Option<Multiplier>,
        #[arg(long, value_parser = cli::parse_multiplier)]
        common: Option<Multiplier>,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    Users {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: i64,
    },
    Payments {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: i64,
    },
    Subscriptions {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    let (file_logging, log_dir) = settings::logging_from_env();
    let log_guard = init_tracing(file_logging, &log_dir);

    let config = Arc::new(Config::from_env()?);
    let pool = init_db(&config.database_url, config.max_connections).await?;

    let notifier: Arc<dyn Notifier> = match config.bot_token.as_deref() {
        Some(token) => Arc::new(TelegramNotifier::new(token)),
        None => {
            warn!("BOT_TOKEN not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let state = AppState::new(pool.clone(), config, notifier);
    let outcome = run(&state, cli.command).await;
    state.notifications.flush().await;
    pool.close().await;

    match outcome {
        Ok(()) => Ok(()),
        Err(LedgerError::Persistence(e)) => {
            error!("Storage failure: {:#}", e);
            Err(e)
        }
        Err(e) => {
            warn!("Request rejected: {}", e);
            eprintln!("{}", e.user_message());
            drop(log_guard);
            std::process::exit(2);
        }
    }
}

/// Keeps the returned guard alive for as long as file logs must be flushed.
fn init_tracing(file_logging: bool, log_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vastnet_ledger=info,vastnet_db=info,sqlx=warn".into());

    let (file_layer, guard) = if file_logging {
        let file_appender = tracing_appender::rolling::daily(log_dir, "ledger.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(file_layer)
        .init();

    guard
}

async fn run(state: &AppState, command: Commands) -> LedgerResult<()> {
    match command {
        Commands::Plans => {
            cli::show_plans(state);
            Ok(())
        }
        Commands::User { tg_id, username, referrer } => {
            cli::show_user(state, tg_id, username.as_deref(), referrer).await
        }
        Commands::Deposit { tg_id, amount } => cli::deposit(state, tg_id, &amount).await,
        Commands::Authorize { tg_id, provider_total, currency } => {
            cli::authorize(state, tg_id, provider_total, currency.as_deref()).await
        }
        Commands::Settle { tg_id, amount, provider_id, currency } => {
            cli::settle(state, tg_id, amount, &provider_id, currency.as_deref()).await
        }
        Commands::Purchase { tg_id, plan_id } => cli::purchase(state, tg_id, plan_id).await,
        Commands::Renew { tg_id, subscription_id } => cli::renew(state, tg_id, subscription_id).await,
        Commands::Toggle { tg_id, subscription_id } => cli::toggle(state, tg_id, subscription_id).await,
        Commands::Admin { acting_id, subcommand } => {
            state.admin.ensure_admin(acting_id)?;
            match subcommand {
                AdminCommands::SetBalance { tg_id, balance } => cli::admin_set_balance(state, tg_id, balance).await,
                AdminCommands::Expire { subscription_id } => cli::admin_expire(state, subscription_id).await,
                AdminCommands::Toggle { subscription_id } => cli::admin_toggle(state, subscription_id).await,
                AdminCommands::Referrer { tg_id, first, common } => {
                    cli::admin_referrer(state, tg_id, first, common).await
                }
            }
        }
        Commands::List { acting_id, subcommand } => {
            state.admin.ensure_admin(acting_id)?;
            match subcommand {
                ListCommands::Users { page, per_page } => cli::list_users(state, page, per_page).await,
                ListCommands::Payments { page, per_page } => cli::list_payments(state, page, per_page).await,
                ListCommands::Subscriptions { page, per_page } => {
                    cli::list_subscriptions(state, page, per_page).await
                }
            }
        }
        Commands::Audit => cli::audit(state).await,
        Commands::Worker { interval_secs, window_hours } => {
            info!("Starting renewal worker");
            cli::run_worker(
                state,
                Duration::from_secs(interval_secs.max(1)),
                Duration::from_secs(window_hours.saturating_mul(3600)),
            )
            .await
        }
    }
}
