//! trippay - billing gateway for the travel marketplace
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌──────────┐    ┌──────────┐
//! │  Client  │───▶│  Checkout │───▶│ Gateway  │───▶│ Callback │
//! │  (HTTP)  │    │ / Link    │    │ (signed) │    │ Reconcile│
//! └──────────┘    └───────────┘    └──────────┘    └────┬─────┘
//!                                                       ▼
//!                 ┌───────────┐                    ┌──────────┐
//!   cron ────────▶│  Renewal  │───────────────────▶│  Ledger  │
//!                 └───────────┘                    └──────────┘
//! ```
//!
//! Usage: `trippay [--env dev] [--port 8080]`

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use trippay::config::AppConfig;
use trippay::gateway_client::HttpGateway;
use trippay::ledger::{InMemoryStore, PaymentStore, PgPaymentStore};
use trippay::logging;
use trippay::server::{self, AppState};

fn arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1).cloned())
}

fn get_env() -> String {
    arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_port() -> anyhow::Result<Option<u16>> {
    arg_value(&["--port", "-p"])
        .map(|p| p.parse::<u16>().with_context(|| format!("invalid --port {}", p)))
        .transpose()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config =
        AppConfig::load(&env).with_context(|| format!("loading config for env '{}'", env))?;
    if let Some(port) = get_port()? {
        config.server.port = port;
    }

    let _guard = logging::init_logging(&config);
    config.validate().context("invalid configuration")?;
    info!(env = %env, merchant_id = %config.gateway.merchant_id, "Starting trippay");

    let store: Arc<dyn PaymentStore> = match config.postgres_url.as_deref() {
        Some(url) => Arc::new(
            PgPaymentStore::connect(url)
                .await
                .context("connecting to PostgreSQL")?,
        ),
        None => {
            warn!(
                "No postgres_url configured, using the in-memory ledger (state is lost on restart)"
            );
            Arc::new(InMemoryStore::new())
        }
    };

    let gateway = Arc::new(HttpGateway::new(Arc::new(config.gateway.clone()))?);
    let state = AppState::from_config(&config, store, gateway)?;

    server::run_server(&config.server, Arc::new(state))
        .await
        .context("serving HTTP")?;
    Ok(())
}
