//! xgw gateway - entry point
//!
//! Live mode connects every configured channel over WebSocket. Dry-run mode
//! serves the same configuration from an in-process simulated venue and
//! submits one demo order.

use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xgw_core::{OrderKind, OrderSide, Price, Quantity};
use xgw_gateway::{AppConfig, Gateway, SimulatedVenue};
use xgw_session::WsTransport;

/// Client-side order execution gateway
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via XGW_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Serve every endpoint from an in-process simulated venue
    #[arg(long)]
    dry_run: bool,

    /// Instrument of the demo order submitted in dry-run mode
    #[arg(long, default_value = "DEMO")]
    demo_instrument: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any wss:// connect
    xgw_session::init_crypto();

    let args = Args::parse();

    // Config path: CLI arg > XGW_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("XGW_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = AppConfig::from_file(&config_path)?;
    xgw_telemetry::init_logging(&config.logging)?;

    info!("Starting xgw gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        order_channels = config.order_channels.len(),
        report_channels = config.report_channels.len(),
        dry_run = args.dry_run,
        "Configuration loaded"
    );

    let venue_shutdown = CancellationToken::new();
    let mut gateway = Gateway::new(config)?;
    let venue = if args.dry_run {
        let venue = SimulatedVenue::spawn(gateway.config(), venue_shutdown.clone());
        gateway.start(Arc::new(venue.transport()))?;
        Some(venue)
    } else {
        gateway.start(Arc::new(WsTransport))?;
        None
    };

    if venue.is_some() {
        let mut updates = gateway.subscribe();
        let order_ref = gateway.submit_order(
            OrderSide::Buy,
            &args.demo_instrument,
            Quantity::new(Decimal::from(1)),
            Price::new(Decimal::from(100)),
            OrderKind::Limit,
        )?;
        info!(order_ref = %order_ref, "Demo order submitted");
        tokio::spawn(async move {
            while let Ok(record) = updates.recv().await {
                info!(
                    order_ref = %record.order_ref,
                    status = ?record.status,
                    filled = %record.filled_qty,
                    version = record.version,
                    "Order update"
                );
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");

    gateway.shutdown().await;
    venue_shutdown.cancel();
    if let Some(venue) = venue {
        venue.join().await;
    }
    Ok(())
}
