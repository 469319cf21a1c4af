// CEX-DEX arbitrage signal bot
// Main entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::StreamExt;
use signal_hook::consts::SIGHUP;
use signal_hook_tokio::Signals;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use solarb_bot::arbitrage::{ArbEngine, QuotePoller, SkipStats};
use solarb_bot::bybit::{BybitWsCluster, BybitWsConfig};
use solarb_bot::config::{load_config, AppConfig};
use solarb_bot::jupiter::{JupiterClient, JupiterClientConfig};
use solarb_bot::market::MarketState;
use solarb_bot::notify::{LogSignalSink, SignalSink};
use solarb_bot::quarantine::{
    run_sanitizer, verify_loop, QuarantineManager, SanitizerConfig, VerifierConfig, Watchlist,
};
use solarb_bot::settings::{load_runtime_settings, RuntimeSettings};
use solarb_bot::tasks::{status_loop, ws_health_loop, MarketBookSink};

#[derive(Debug, Parser)]
#[command(name = "solarb-bot", about = "Bybit x Jupiter arbitrage signal bot")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the runtime settings overlay.
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,
}

fn settings_defaults(cfg: &AppConfig) -> RuntimeSettings {
    RuntimeSettings {
        bybit_taker_fee_bps: cfg.thresholds.bybit_taker_fee_bps,
        solana_tx_fee_usd: cfg.thresholds.solana_tx_fee_usd,
        latency_buffer_bps: cfg.thresholds.latency_buffer_bps,
        usdt_usdc_buffer_bps: cfg.thresholds.usdt_usdc_buffer_bps,
        min_profit_usd: cfg.thresholds.min_profit_usd,
        notional_usd: cfg.notional_usd(),
        max_cex_slippage_bps: cfg.filters.max_cex_slippage_bps,
        max_dex_price_impact_pct: cfg.filters.max_dex_price_impact_pct,
        persistence_hits: cfg.filters.persistence_hits,
        cooldown_sec: cfg.filters.cooldown_sec,
        min_delta_profit_usd_to_resend: cfg.filters.min_delta_profit_usd_to_resend,
        price_ratio_max: cfg.filters.price_ratio_max,
        gross_profit_cap_pct: cfg.filters.gross_profit_cap_pct,
        max_spread_bps: cfg.filters.max_spread_bps,
        min_depth_coverage_pct: cfg.filters.min_depth_coverage_pct,
        engine_tick_hz: cfg.runtime.engine_tick_hz,
        jupiter_poll_interval_sec: cfg.jupiter.poll_interval_sec,
        max_ob_age_ms: cfg.runtime.max_ob_age_ms,
        max_quote_age_ms: cfg.runtime.max_quote_age_ms,
        exchange_enabled: true,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    let jup_api_key = std::env::var("JUP_API_KEY").unwrap_or_default();
    if jup_api_key.is_empty() {
        warn!("JUP_API_KEY not set, quote requests go out unauthenticated");
    }
    if cfg.trading.stable.mint.is_empty() {
        anyhow::bail!("trading.stable.mint must be configured");
    }

    let defaults = settings_defaults(&cfg);
    let settings = load_runtime_settings(&cli.settings, &defaults);
    info!(
        tokens = cfg.trading.tokens.len(),
        notional = %settings.notional_usd,
        exchange_enabled = settings.exchange_enabled,
        "starting"
    );

    // Quarantine owns the active view of the watchlist.
    let (changed_tx, mut changed_rx) = mpsc::channel::<()>(1);
    let watchlist = Watchlist {
        symbols: cfg.full_symbols(),
        tokens: cfg.trading.tokens.clone(),
        denylist_symbols: cfg.filters.denylist_symbols.clone(),
        denylist_regex: cfg.filters.denylist_regex.clone(),
    };
    let quarantine = QuarantineManager::new(cfg.quarantine.file.clone(), watchlist, changed_tx);
    quarantine.load_initial();

    let state = Arc::new(MarketState::new());
    let skip_stats = Arc::new(SkipStats::new(Duration::from_secs(30)));

    let (skip_tx, skip_rx) = mpsc::channel(256);
    let jup = Arc::new(
        JupiterClient::new(
            JupiterClientConfig {
                base_url: cfg.jupiter.base_url.clone(),
                api_key: jup_api_key,
                timeout: Duration::from_secs_f64(cfg.jupiter.timeout_sec),
                slippage_bps: cfg.jupiter.slippage_bps,
                restrict_intermediate_tokens: cfg.jupiter.restrict_intermediate_tokens,
                max_accounts: cfg.jupiter.max_accounts,
                rps: cfg.rate_limits.rps,
                concurrency: cfg.rate_limits.concurrency,
                max_retries: cfg.rate_limits.max_retries,
            },
            Some(skip_tx),
        )
        .context("build jupiter client")?,
    );

    let sink: Arc<dyn SignalSink> = Arc::new(LogSignalSink);
    let stable_mint = cfg.trading.stable.mint.clone();
    let stable_decimals = cfg.trading.stable.decimals;

    let engine = ArbEngine::new(
        state.clone(),
        jup.clone(),
        quarantine.clone(),
        skip_stats.clone(),
        sink,
        stable_mint.clone(),
        stable_decimals,
        &settings,
    );
    let poller = QuotePoller::new(
        state.clone(),
        jup.clone(),
        quarantine.clone(),
        skip_stats.clone(),
        stable_mint.clone(),
        stable_decimals,
        &settings,
    );

    let book_sink = MarketBookSink::new(state.clone(), quarantine.clone());
    let cluster = Arc::new(BybitWsCluster::new(
        BybitWsConfig {
            url: cfg.bybit.ws_url.clone(),
            depth: cfg.bybit.depth,
            ping_interval: Duration::from_secs(cfg.bybit.ping_interval_sec),
            ..Default::default()
        },
        book_sink,
        cfg.bybit.max_symbols_per_ws,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let (exchange_tx, exchange_rx) = watch::channel(settings.exchange_enabled);

    if settings.exchange_enabled {
        cluster.start(&quarantine.active().symbols).await;
    } else {
        info!("exchange disabled at startup, WS cluster not started");
    }

    let mut tasks: JoinSet<()> = JoinSet::new();

    tasks.spawn(engine.clone().run(stop_rx.clone(), exchange_rx.clone()));
    tasks.spawn(poller.clone().run(stop_rx.clone(), exchange_rx.clone()));

    let mint_to_symbol = cfg
        .trading
        .tokens
        .values()
        .filter(|t| !t.mint.is_empty())
        .map(|t| (t.mint.clone(), t.bybit_symbol.clone()))
        .collect();
    tasks.spawn(run_sanitizer(
        skip_rx,
        quarantine.clone(),
        SanitizerConfig {
            stable_mint: stable_mint.clone(),
            mint_to_symbol,
            ttl_not_tradable_sec: cfg.quarantine.ttl_not_tradable_sec,
            ttl_no_route_sec: cfg.quarantine.ttl_no_route_sec,
        },
        stop_rx.clone(),
    ));

    tasks.spawn(
        quarantine
            .clone()
            .sync_loop(Duration::from_secs(10), stop_rx.clone()),
    );

    tasks.spawn(verify_loop(
        quarantine.clone(),
        jup.clone(),
        VerifierConfig {
            stable_mint: stable_mint.clone(),
            stable_decimals,
            notional_usd: settings.notional_usd,
            interval: Duration::from_secs(cfg.quarantine.verify_interval_sec),
        },
        exchange_rx.clone(),
        stop_rx.clone(),
    ));

    tasks.spawn(status_loop(
        state.clone(),
        quarantine.clone(),
        engine.clone(),
        Duration::from_secs_f64(cfg.runtime.status_interval_sec),
        stop_rx.clone(),
    ));

    tasks.spawn(ws_health_loop(
        state.clone(),
        quarantine.clone(),
        Duration::from_secs_f64(cfg.quarantine.ws_snapshot_timeout_sec),
        stop_rx.clone(),
    ));

    // Quarantine transitions drive the cluster's desired symbol set.
    {
        let cluster = cluster.clone();
        let quarantine = quarantine.clone();
        let mut stop = stop_rx.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    ev = changed_rx.recv() => match ev {
                        Some(()) => {
                            cluster.update_symbols(&quarantine.active().symbols).await;
                        }
                        None => return,
                    },
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    // SIGHUP re-reads the settings overlay and fans the new bag out.
    {
        let engine = engine.clone();
        let poller = poller.clone();
        let cluster = cluster.clone();
        let quarantine = quarantine.clone();
        let settings_path = cli.settings.clone();
        let defaults = defaults.clone();
        let mut signals = Signals::new([SIGHUP]).context("install SIGHUP handler")?;
        let mut prev_enabled = settings.exchange_enabled;
        tasks.spawn(async move {
            while let Some(_sig) = signals.next().await {
                let fresh = load_runtime_settings(&settings_path, &defaults);
                engine.reload_settings(&fresh);
                poller.reload_settings(&fresh);
                let _ = exchange_tx.send(fresh.exchange_enabled);
                if fresh.exchange_enabled != prev_enabled {
                    if fresh.exchange_enabled {
                        cluster.start(&quarantine.active().symbols).await;
                        info!("exchange enabled, WS cluster started");
                    } else {
                        cluster.stop().await;
                        info!("exchange disabled, WS cluster stopped");
                    }
                    prev_enabled = fresh.exchange_enabled;
                }
                info!("runtime settings reloaded");
            }
        });
    }

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutting down");

    let _ = stop_tx.send(true);
    cluster.stop().await;
    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("some tasks did not stop in time, aborting");
        tasks.abort_all();
    }

    info!("bye");
    Ok(())
}
