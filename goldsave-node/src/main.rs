//! Gold savings ledger node
//!
//! Loads the configuration, opens the store, applies the configured seed
//! data and reports the ledger state.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use lib_economy::{LedgerConfig, RateProvider, SavingsLedger};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "goldsave-node/goldsave.toml";

struct Args {
    config: PathBuf,
    /// `--config` given on the command line, so a missing file is an error
    explicit: bool,
    database: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        explicit: false,
        database: None,
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = iter.next().context("--config requires a path")?;
                args.config = PathBuf::from(value);
                args.explicit = true;
            }
            "--database" | "-d" => {
                let value = iter.next().context("--database requires a path")?;
                args.database = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                println!("Usage: goldsave-node [--config <file>] [--database <file>]");
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }
    Ok(args)
}

fn load_config(args: &Args) -> Result<LedgerConfig> {
    let mut config = if args.config.exists() || args.explicit {
        LedgerConfig::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?
    } else {
        warn!(path = %args.config.display(), "config file not found, using defaults");
        LedgerConfig::default()
    };
    if let Some(database) = &args.database {
        config.store.database_path = Some(database.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting gold savings ledger node");

    let args = parse_args()?;
    let config = load_config(&args)?;

    match &config.store.database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
            }
            info!(path = %path.display(), "Opening ledger store");
        }
        None => warn!("No database_path configured; ledger is in memory and will not persist"),
    }

    let ledger = SavingsLedger::open(config).await.context("opening ledger")?;
    let seeded = ledger.seed().await.context("seeding ledger")?;
    info!(
        plans_created = seeded.plans_created,
        plans_existing = seeded.plans_existing,
        levels = seeded.levels_configured,
        "Seed applied"
    );

    for plan in ledger.plans().list(true).await? {
        info!(
            plan = %plan.name,
            monthly = %plan.monthly_amount,
            payments = plan.payment_months,
            duration = plan.duration_months,
            "Active plan"
        );
    }

    for level in ledger.commissions().level_config().await? {
        info!(level = level.level, percentage = %level.percentage, "Commission level");
    }

    let fallback = ledger.config().rates.fallback_rate;
    let rate = ledger.rates().current_rate_or(None, fallback).await?;
    info!(rate = %rate.rate_per_gram, as_of = %rate.as_of_date, source = ?rate.source, "Gold rate");

    let members = ledger.registry().member_count().await?;
    info!(members, "Ledger ready");

    ledger.close().await;
    Ok(())
}
