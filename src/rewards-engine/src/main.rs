//! Rewards Engine: loyalty tier resolution and threshold management.
//!
//! Replays a JSON script of operations against an in-memory engine and
//! prints the outcome of every step, the resulting cards and program
//! statistics.

mod script;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use rewards_core::config::EngineConfig;
use rewards_core::thresholds::{BenefitMilestones, ThresholdSettings};
use rewards_loyalty::{CardQuery, ChannelSink, EngineStores, LoyaltyEngine};
use rewards_store::InMemoryUserDirectory;
use serde_json::json;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::script::{Replayer, Script};

#[derive(Parser, Debug)]
#[command(name = "rewards-engine")]
#[command(about = "Loyalty tier resolution and threshold management engine")]
#[command(version)]
struct Cli {
    /// Path to a TOML/JSON config file
    #[arg(short, long, env = "REWARDS_ENGINE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "REWARDS_ENGINE__NODE_ID")]
    node_id: Option<String>,

    /// Cards per recalculation page (overrides config)
    #[arg(long, env = "REWARDS_ENGINE__RECALCULATION__PAGE_SIZE")]
    page_size: Option<usize>,

    /// Card number prefix (overrides config)
    #[arg(long, env = "REWARDS_ENGINE__CARDS__NUMBER_PREFIX")]
    card_prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a JSON operation script
    Replay {
        /// Script file
        script: String,

        /// Pretty-print the JSON output
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },

    /// Print the effective configuration defaults for thresholds and milestones
    Defaults,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rewards_engine=info,rewards_loyalty=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(page_size) = cli.page_size {
        config.recalculation.page_size = page_size;
    }
    if let Some(prefix) = cli.card_prefix {
        config.cards.number_prefix = prefix;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        page_size = config.recalculation.page_size,
        card_prefix = %config.cards.number_prefix,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Defaults => {
            let out = json!({
                "thresholds": config.thresholds.settings(),
                "milestones": BenefitMilestones::default(),
                "builtin_thresholds": ThresholdSettings::default(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Replay { script, pretty } => {
            let raw = tokio::fs::read_to_string(&script).await?;
            let script: Script = serde_json::from_str(&raw)?;
            let out = replay(&config, script).await?;
            let rendered = if pretty {
                serde_json::to_string_pretty(&out)?
            } else {
                serde_json::to_string(&out)?
            };
            println!("{rendered}");
        }
    }

    Ok(())
}

async fn replay(config: &EngineConfig, script: Script) -> anyhow::Result<serde_json::Value> {
    let users = Arc::new(InMemoryUserDirectory::new());
    for user in script.users {
        users.upsert(user);
    }

    let (sink, mut receiver) = ChannelSink::new(config.events.channel_capacity);
    let notifier = tokio::spawn(async move {
        let mut delivered = 0u64;
        while let Some(event) = receiver.recv().await {
            delivered += 1;
            debug!(
                event_id = %event.event_id,
                event_type = ?event.event_type,
                "Loyalty event"
            );
        }
        delivered
    });

    let engine = LoyaltyEngine::new(
        config,
        EngineStores::in_memory(users.clone()),
        Arc::new(sink),
        Handle::current(),
    )?;

    info!(operations = script.operations.len(), "Replaying script");
    let steps = Replayer::new(&engine, &users)
        .run(script.operations)
        .await?;

    let stats = engine.stats()?;
    let cards = engine.list_cards(&CardQuery {
        page: 1,
        limit: Some(usize::try_from(stats.total_members)?.max(1)),
        search: None,
    })?;
    let thresholds = engine.thresholds()?;
    let early_access_just_disabled = engine.early_access_just_disabled()?;

    // Dropping the engine closes the event channel.
    drop(engine);
    let delivered = notifier.await?;
    info!(
        steps = steps.len(),
        events = delivered,
        "Replay finished"
    );

    Ok(json!({
        "steps": steps,
        "thresholds": *thresholds,
        "early_access_just_disabled": early_access_just_disabled,
        "cards": cards.cards,
        "stats": stats,
    }))
}
