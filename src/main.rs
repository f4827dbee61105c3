use anyhow::{Context, Result};
use api_client::{BinanceClient, MarketData};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use configuration::{ExecutionMode, Settings, load_settings};
use core_types::{BotType, Timeframe};
use database::{DbRepository, connect, run_migrations};
use engine::{Engine, EngineParts};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first so tracing picks up the configured filter.
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    let _log_guard = configuration::init_tracing(&settings.logging)?;

    // .env carries DATABASE_URL and exchange keys; absence is fine for
    // paper mode.
    let _ = dotenvy::dotenv();

    tracing::info!("stratum starting");

    match cli.command {
        Commands::Run(args) => handle_run(settings, args).await?,
        Commands::Cycle(args) => handle_cycle(settings, args).await?,
        Commands::Status(args) => handle_status(settings, args).await?,
        Commands::Create(args) => handle_create(settings, args).await?,
        Commands::Bot(args) => handle_bot(settings, args).await?,
    }

    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

#[derive(Parser)]
#[command(author, version, about = "Condition-evaluation and bot-dispatch engine", long_about = None)]
struct Cli {
    /// Path to the settings file (default: stratum.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine loop: evaluator, notifier, executors, tick poller.
    Run(RunArgs),
    /// Run a single evaluation cycle and exit.
    Cycle(RunArgs),
    /// Show bots, positions, and recent orders.
    Status(StatusArgs),
    /// Create a bot from a JSON definition file.
    Create(CreateArgs),
    /// Bot lifecycle commands: start, pause, resume, stop, delete.
    Bot(BotArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Override the execution mode from the settings file.
    #[arg(long, value_enum)]
    mode: Option<ExecutionMode>,
    /// In paper mode: seed one bot from a JSON definition and start it.
    #[arg(long)]
    bot_file: Option<PathBuf>,
}

#[derive(Parser)]
struct StatusArgs {
    /// Show one bot in detail instead of the overview table.
    #[arg(long)]
    bot: Option<Uuid>,
}

#[derive(Parser)]
struct CreateArgs {
    /// JSON file: {"bot_type", "symbols", "interval", "config"}.
    file: PathBuf,
    /// Owning user id; a fresh one is generated when omitted.
    #[arg(long)]
    user: Option<Uuid>,
}

#[derive(Parser)]
struct BotArgs {
    #[command(subcommand)]
    action: BotAction,
}

#[derive(Subcommand)]
enum BotAction {
    Start { bot_id: Uuid },
    Pause { bot_id: Uuid },
    Resume { bot_id: Uuid },
    Stop { bot_id: Uuid },
    Delete { bot_id: Uuid },
}

/// The on-disk bot definition accepted by `create` and `--bot-file`.
#[derive(Deserialize)]
struct BotFile {
    bot_type: BotType,
    symbols: Vec<String>,
    interval: Timeframe,
    config: serde_json::Value,
}

// ==============================================================================
// Engine wiring
// ==============================================================================

fn market_client(settings: &Settings) -> Arc<dyn MarketData> {
    // Market data is public; the production endpoint serves paper mode too.
    Arc::new(BinanceClient::new(
        true,
        &settings.api,
        Duration::from_secs(settings.engine.market_data_timeout_secs),
    ))
}

async fn live_engine(settings: Settings) -> Result<Arc<Engine>> {
    let pool = connect().await.context("database connection failed")?;
    run_migrations(&pool).await.context("migrations failed")?;
    let repo = DbRepository::new(pool);

    let exchange = Arc::new(BinanceClient::new(
        true,
        &settings.api,
        Duration::from_secs(settings.engine.order_timeout_secs),
    ));

    let market = market_client(&settings);
    Ok(Engine::new(settings, market, EngineParts::live(repo, exchange)))
}

async fn paper_engine(settings: Settings) -> Result<Arc<Engine>> {
    let market = market_client(&settings);
    Ok(Engine::new(settings, market, EngineParts::paper()))
}

async fn engine_for_mode(settings: Settings, mode: ExecutionMode) -> Result<Arc<Engine>> {
    match mode {
        ExecutionMode::Live => live_engine(settings).await,
        ExecutionMode::Paper => paper_engine(settings).await,
    }
}

async fn seed_bot(engine: &Arc<Engine>, file: &PathBuf, user: Option<Uuid>) -> Result<Uuid> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading bot file {}", file.display()))?;
    let definition: BotFile = serde_json::from_str(&raw).context("parsing bot file")?;

    let bot_id = engine
        .create_bot(
            user.unwrap_or_else(Uuid::new_v4),
            definition.bot_type,
            definition.symbols,
            definition.interval,
            definition.config,
        )
        .await?;
    Ok(bot_id)
}

// ==============================================================================
// Command handlers
// ==============================================================================

async fn handle_run(settings: Settings, args: RunArgs) -> Result<()> {
    let mode = args.mode.unwrap_or(settings.engine.execution_mode);
    let engine = engine_for_mode(settings, mode).await?;

    if let Some(file) = &args.bot_file {
        let bot_id = seed_bot(&engine, file, None).await?;
        engine.start_bot(bot_id).await?;
        println!("Seeded and started bot {bot_id}");
    }

    engine.start_background().await?;
    println!("Engine running ({mode:?} mode). Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    println!("\nShutting down...");
    engine.shutdown();

    // Give executor mailboxes a moment to drain in-flight work.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let metrics = engine.metrics();
    println!(
        "Cycles: {}  evaluated: {}  triggers: {}  frames fetched/skipped: {}/{}",
        metrics.cycles,
        metrics.fingerprints_evaluated,
        metrics.triggers_emitted,
        metrics.groups_fetched,
        metrics.groups_skipped,
    );
    Ok(())
}

async fn handle_cycle(settings: Settings, args: RunArgs) -> Result<()> {
    let mode = args.mode.unwrap_or(settings.engine.execution_mode);
    let engine = engine_for_mode(settings, mode).await?;

    if let Some(file) = &args.bot_file {
        let bot_id = seed_bot(&engine, file, None).await?;
        engine.start_bot(bot_id).await?;
    }

    let summary = engine.run_single_cycle().await?;
    println!(
        "Cycle {}: evaluated {} fingerprints, {} triggers, {} frames fetched, {} skipped, {} indeterminate, {} errors",
        summary.cycle,
        summary.evaluated,
        summary.triggered,
        summary.frames_fetched,
        summary.frames_skipped,
        summary.indeterminate,
        summary.errors,
    );
    Ok(())
}

async fn handle_status(settings: Settings, args: StatusArgs) -> Result<()> {
    // Status reads persisted state, so it always goes to the database.
    let engine = live_engine(settings).await?;

    match args.bot {
        None => {
            let bots = engine.list_bots().await?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["Bot", "Type", "Status", "Symbols", "Interval", "Created"]);
            for bot in bots {
                table.add_row(vec![
                    Cell::new(bot.bot_id),
                    Cell::new(bot.bot_type.as_str()),
                    Cell::new(bot.status.as_str()),
                    Cell::new(bot.symbols.join(", ")),
                    Cell::new(bot.interval.as_str()),
                    Cell::new(bot.created_at.format("%Y-%m-%d %H:%M")),
                ]);
            }
            println!("{table}");
        }
        Some(bot_id) => {
            let (bot, run) = engine.bot_status(bot_id).await?;
            println!("Bot {} [{}] is {}", bot.bot_id, bot.bot_type.as_str(), bot.status.as_str());
            if let Some(run) = run {
                println!("Active run {} since {}", run.run_id, run.started_at);
            }

            let positions = engine.positions(bot_id).await?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["Symbol", "Qty", "Avg Entry", "Realized", "Unrealized", "DCAs"]);
            for p in positions {
                table.add_row(vec![
                    Cell::new(&p.symbol),
                    Cell::new(p.qty),
                    Cell::new(p.avg_entry_price),
                    Cell::new(p.realized_pnl),
                    Cell::new(p.unrealized_pnl),
                    Cell::new(p.dca_index),
                ]);
            }
            println!("{table}");

            let orders = engine.orders(bot_id, 20).await?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["Order", "Symbol", "Side", "Qty", "Fill", "Fees", "Status", "Created"]);
            for o in orders {
                table.add_row(vec![
                    Cell::new(o.order_id),
                    Cell::new(&o.symbol),
                    Cell::new(format!("{:?}", o.side)),
                    Cell::new(o.qty),
                    Cell::new(o.fill_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())),
                    Cell::new(o.fees),
                    Cell::new(o.status.as_str()),
                    Cell::new(o.created_at.format("%Y-%m-%d %H:%M:%S")),
                ]);
            }
            println!("{table}");

            let pnl = engine.pnl(bot_id).await?;
            println!("PnL: realized {}, unrealized {}", pnl.realized, pnl.unrealized);
        }
    }
    Ok(())
}

async fn handle_create(settings: Settings, args: CreateArgs) -> Result<()> {
    let engine = live_engine(settings).await?;
    let bot_id = seed_bot(&engine, &args.file, args.user).await?;
    println!("Created bot {bot_id} (inactive). Start it with: stratum bot start {bot_id}");
    Ok(())
}

async fn handle_bot(settings: Settings, args: BotArgs) -> Result<()> {
    let engine = live_engine(settings).await?;
    match args.action {
        BotAction::Start { bot_id } => {
            let run_id = engine.start_bot(bot_id).await?;
            println!("Bot {bot_id} started (run {run_id})");
        }
        BotAction::Pause { bot_id } => {
            engine.pause_bot(bot_id).await?;
            println!("Bot {bot_id} paused");
        }
        BotAction::Resume { bot_id } => {
            engine.resume_bot(bot_id).await?;
            println!("Bot {bot_id} resumed");
        }
        BotAction::Stop { bot_id } => {
            engine.stop_bot(bot_id).await?;
            println!("Bot {bot_id} stopped");
        }
        BotAction::Delete { bot_id } => {
            engine.delete_bot(bot_id).await?;
            println!("Bot {bot_id} deleted");
        }
    }
    Ok(())
}
