use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use sports_arb::config::Config;
use sports_arb::engine::manual::ManualEntry;
use sports_arb::engine::{Allocation, ArbitrageOpportunity, ExecutionGuard, ExecutionVerdict, Side};
use sports_arb::feed::the_odds_api::TheOddsApi;
use sports_arb::pipeline::Scanner;
use sports_arb::store::{active_opportunities, JsonFileStore, MemoryStore, OpportunityStore};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sportsbook arbitrage scanner and stake allocator.
#[derive(Parser, Debug)]
#[command(name = "sports-arb")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the odds API and publish arbitrage opportunities
    Scan {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Show active opportunities from the last scan
    List {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enter a two-way opportunity by hand
    Manual(ManualArgs),
    /// Size stakes and deposits for a matched pair
    Allocate(AllocateArgs),
    /// Split the edge once the result is in
    Settle(SettleArgs),
}

#[derive(Parser, Debug)]
struct ManualArgs {
    #[arg(long, default_value = "Manual")]
    sport_label: String,
    #[arg(long)]
    home: String,
    #[arg(long)]
    away: String,
    #[arg(long)]
    bookmaker_a: String,
    #[arg(long)]
    odds_a: f64,
    #[arg(long)]
    bookmaker_b: String,
    #[arg(long)]
    odds_b: f64,
    #[arg(long, default_value_t = 1000.0)]
    pool: f64,
    /// Minutes until the opportunity expires
    #[arg(long, default_value_t = 15)]
    countdown: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum WinnerArg {
    A,
    B,
}

#[derive(Parser, Debug)]
struct AllocateArgs {
    #[arg(long)]
    odds_a: f64,
    #[arg(long)]
    odds_b: f64,
    #[arg(long, default_value_t = 1000.0)]
    pool: f64,
    /// Re-check the margin at execution time with these odds for side A
    #[arg(long, requires = "current_odds_b")]
    current_odds_a: Option<f64>,
    #[arg(long, requires = "current_odds_a")]
    current_odds_b: Option<f64>,
}

#[derive(Parser, Debug)]
struct SettleArgs {
    #[arg(long)]
    odds_a: f64,
    #[arg(long)]
    odds_b: f64,
    #[arg(long, default_value_t = 1000.0)]
    pool: f64,
    #[arg(long, value_enum)]
    winner: WinnerArg,
}

fn init_logging(config: &Config) -> Result<()> {
    let log_file = std::fs::File::create(&config.logging.file).with_context(|| {
        format!("failed to create log file {}", config.logging.file.display())
    })?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

fn open_store(path: Option<&Path>) -> Box<dyn OpportunityStore> {
    match path {
        Some(p) => Box::new(JsonFileStore::new(p)),
        None => Box::new(MemoryStore::new()),
    }
}

fn print_opportunity(opp: &ArbitrageOpportunity) {
    println!(
        "  [{}] {} ({})  starts {}  margin {:.2}%  stake {:.2}  profit {:.2}  min deposit {:.2}  expires {}",
        opp.sport_label,
        opp.matchup(),
        opp.event_id,
        opp.commence_time.format("%b %d %H:%M UTC"),
        opp.profit_margin * 100.0,
        opp.total_stake,
        opp.expected_profit,
        opp.min_deposit,
        opp.expires_at.format("%H:%M:%S UTC"),
    );
    for leg in &opp.legs {
        println!(
            "      {:<5} {:<20} @ {:>6.2}  stake {:>9.2}",
            leg.outcome.label(),
            leg.bookmaker,
            leg.price,
            leg.stake,
        );
    }
}

async fn run_scan(config: &Config, once: bool) -> Result<()> {
    let odds_api_key = Config::odds_api_key()?;
    let mut feed = TheOddsApi::new(
        odds_api_key,
        &config.odds_feed.base_url,
        &config.odds_feed.regions,
        &config.odds_feed.bookmakers,
        config.odds_feed.odds_format,
    );

    // Validate API key before polling
    let quota = feed.check_quota().await?;
    println!(
        "  Odds API OK: {}/{} requests remaining",
        quota.requests_remaining,
        quota.requests_used + quota.requests_remaining,
    );

    let store = open_store(config.store.snapshot_path.as_deref());
    let mut scanner = Scanner::from_config(config, store);
    if scanner.pipelines.is_empty() {
        anyhow::bail!("no sports enabled in config");
    }
    let sports: Vec<&str> = scanner.pipelines.iter().map(|p| p.key.as_str()).collect();
    println!("  Scanning: {}", sports.join(", "));
    println!();

    let poll_interval = Duration::from_secs(config.odds_feed.poll_interval_s.unwrap_or(300));

    loop {
        let now = Utc::now();
        let report = scanner.run_cycle(&mut feed, now).await?;
        println!(
            "  {}  polled {}  failed {}  events {}  opportunities {}",
            now.format("%H:%M:%S"),
            report.sports_polled,
            report.sports_failed.len(),
            report.events,
            report.opportunities,
        );
        for opp in scanner.store().list()? {
            print_opportunity(&opp);
        }

        if once {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                println!("  Stopped.");
                return Ok(());
            }
        }
    }
}

fn run_list(config: &Config, json: bool) -> Result<()> {
    let path = config
        .store
        .snapshot_path
        .as_deref()
        .context("store.snapshot_path is not configured")?;
    let store = JsonFileStore::new(path);
    let active = active_opportunities(&store, Utc::now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&active)?);
        return Ok(());
    }
    if active.is_empty() {
        println!("  No active opportunities.");
    }
    for opp in &active {
        print_opportunity(opp);
    }
    Ok(())
}

fn run_manual(config: &Config, args: ManualArgs) -> Result<()> {
    let entry = ManualEntry {
        sport_label: args.sport_label,
        home_team: args.home,
        away_team: args.away,
        bookmaker_a: args.bookmaker_a,
        odds_a: args.odds_a,
        bookmaker_b: args.bookmaker_b,
        odds_b: args.odds_b,
        pool: args.pool,
        countdown_min: args.countdown,
    };
    let opp = entry.into_opportunity(Utc::now())?;
    print_opportunity(&opp);

    // Published alongside the last scan; the next scan replaces it.
    if let Some(path) = config.store.snapshot_path.as_deref() {
        let store = JsonFileStore::new(path);
        let mut board = store.list()?;
        board.push(opp);
        store.replace_all(board)?;
        println!("  Published to {}", path.display());
    }
    Ok(())
}

fn run_allocate(config: &Config, args: AllocateArgs) -> Result<()> {
    let alloc = Allocation::new(args.odds_a, args.odds_b, args.pool)?;
    println!("  implied sum   {:.4}", alloc.implied_sum);
    println!("  margin        {:.2}%", alloc.profit_margin * 100.0);
    println!("  stake A       {:.2} @ {:.2}", alloc.stake_a, alloc.odds_a);
    println!("  stake B       {:.2} @ {:.2}", alloc.stake_b, alloc.odds_b);
    println!("  total edge    {:.2}", alloc.total_edge);
    println!("  deposit A     {:.2}", alloc.deposit_a);
    println!("  deposit B     {:.2}", alloc.deposit_b);

    if let (Some(a), Some(b)) = (args.current_odds_a, args.current_odds_b) {
        let guard = ExecutionGuard::from_config(&config.settlement);
        match guard.check(a, b, args.pool)? {
            ExecutionVerdict::Proceed(now) => {
                println!("  execution     PROCEED at margin {:.2}%", now.profit_margin * 100.0);
            }
            ExecutionVerdict::Cancel { profit_margin, min_margin } => {
                println!(
                    "  execution     CANCEL: margin {:.2}% <= {:.2}%, refund {:.2} / {:.2}",
                    profit_margin * 100.0,
                    min_margin * 100.0,
                    alloc.deposit_a,
                    alloc.deposit_b,
                );
            }
        }
    }

    Ok(())
}

fn run_settle(config: &Config, args: SettleArgs) -> Result<()> {
    let alloc = Allocation::new(args.odds_a, args.odds_b, args.pool)?;
    let winner = match args.winner {
        WinnerArg::A => Side::A,
        WinnerArg::B => Side::B,
    };
    let s = alloc.settle(winner, config.settlement.platform_cut);
    println!("  winner        {:?} ({:.2} @ {:.2})", s.winner, alloc.stake(winner), alloc.odds(winner));
    println!("  bookmaker pay {:.2}", s.bookmaker_payout);
    println!("  loser returns {:.2}", s.loser_recovery);
    println!("  total edge    {:.2}", s.total_edge);
    println!("  platform      {:.2}", s.platform_share);
    println!("  winner profit {:.2}", s.winner_profit);
    println!("  loser profit  {:.2}", s.loser_profit);
    if !s.is_balanced() {
        tracing::warn!(
            distributed = s.distributed_edge(),
            edge = s.total_edge,
            "edge split does not add up"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();
    let config = Config::load(&cli.config)?;
    init_logging(&config)?;

    println!();
    println!("  Sports Arb v{}", env!("CARGO_PKG_VERSION"));
    println!("  =================");
    println!();

    let result = match cli.command {
        Command::Scan { once } => run_scan(&config, once).await,
        Command::List { json } => run_list(&config, json),
        Command::Manual(args) => run_manual(&config, args),
        Command::Allocate(args) => run_allocate(&config, args),
        Command::Settle(args) => run_settle(&config, args),
    };

    if let Err(e) = &result {
        tracing::error!("fatal: {:#}", e);
    }
    result
}
