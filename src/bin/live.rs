//! Run one venue session from env config and log periodic book stats.
//!
//! ```text
//! PERPMUX_VENUE=bybit PERPMUX_SYMBOL=BTCUSDT BYBIT_API_KEY=... cargo run --bin perpmux-live
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use perpmux::config::{Credentials, SessionConfig};
use perpmux::session::VenueSession;
use perpmux::venues::{binance::Binance, bybit::Bybit, dydx::Dydx, hyperliquid::Hyperliquid, VenuePort};

fn build_port(venue: &str, config: &SessionConfig) -> anyhow::Result<Arc<dyn VenuePort>> {
    let port: Arc<dyn VenuePort> = match venue {
        "binance" => Arc::new(Binance::new(Credentials::from_env("BINANCE")?, config)),
        "bybit" => Arc::new(Bybit::new(Credentials::from_env("BYBIT")?, config)),
        "hyperliquid" => Arc::new(Hyperliquid::new(Credentials::from_env("HYPERLIQUID")?, config)),
        "dydx" => Arc::new(Dydx::new(Credentials::from_env("DYDX")?, config)),
        other => anyhow::bail!("unknown venue: {other}"),
    };
    Ok(port)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let file_appender = tracing_appender::rolling::daily("logs", "perpmux.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    let venue = std::env::var("PERPMUX_VENUE").unwrap_or_else(|_| "bybit".to_string());
    let config = SessionConfig::from_env()?;

    info!("═══════════════════════════════════════════");
    info!("  perpmux — {venue} / {}", config.symbol);
    info!("═══════════════════════════════════════════");

    let port = build_port(&venue, &config)?;
    let session = VenueSession::spawn(port, config).await?;
    let state = session.state();
    info!("🚀 session live — streaming");

    let mut stats = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats.tick() => {
                let book = state.orderbook().await;
                let ticker = state.ticker().await;
                if book.is_populated() {
                    info!(
                        "book seq={} mid={:.2} wmid={:.2} spread={:.4} | mark={:.2} funding={:.3}bps",
                        book.seq_id(),
                        book.mid(),
                        book.wmid(),
                        book.spread(),
                        ticker.mark_price,
                        ticker.funding_rate_bps(),
                    );
                } else {
                    info!("book warming up (seq={})", book.seq_id());
                }
            }
        }
    }

    info!("🧹 shutting down");
    session.shutdown().await;
    Ok(())
}
