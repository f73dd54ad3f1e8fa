//! Eth Tx Manager - submit one transaction and see it through to confirmation
//!
//! Reads the transaction and the submission policy from the TOML settings
//! file, sends the transaction and logs its progress. Ctrl+C cancels the
//! pending transaction by replacing it with a zero-value self transfer.

use anyhow::{Context, Result};
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use eth_tx_manager::chain::{EthersLedgerClient, LedgerClient, ProviderFeeEstimator, WalletSigner};
use eth_tx_manager::config::{gwei_to_wei, Settings, TransactionConfig};
use eth_tx_manager::metrics::MetricsServer;
use eth_tx_manager::{SubmissionEvent, TransactionIntent, TxManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Eth Tx Manager v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration with {} RPC and {} broadcast endpoints",
        settings.chain.rpc_urls.len(),
        settings.chain.broadcast_urls.len()
    );

    // Initialize chain access
    let client = Arc::new(EthersLedgerClient::new(&settings.chain.rpc_urls)?);
    let mut broadcast_nodes: Vec<Arc<dyn LedgerClient>> = Vec::new();
    for url in &settings.chain.broadcast_urls {
        match EthersLedgerClient::new(std::slice::from_ref(url)) {
            Ok(node) => broadcast_nodes.push(Arc::new(node)),
            Err(e) => warn!("Skipping broadcast endpoint {}: {}", url, e),
        }
    }

    let signer = Arc::new(WalletSigner::from_env(
        &settings.wallet.private_key_env,
        client.clone(),
    )?);
    let fee_estimator = Arc::new(ProviderFeeEstimator::new(client.clone(), &settings.manager));

    let manager = TxManager::new(
        client,
        signer,
        fee_estimator,
        broadcast_nodes,
        settings.manager.clone(),
    )?;
    info!("Transaction manager initialized for {:?}", manager.address());

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let intent = build_intent(&settings.transaction)?;
    let submission = manager.create_submission(intent);
    let mut handle = submission.send()?;
    info!("Submission {} started", submission.id());

    let mut shutdown = Box::pin(shutdown_signal());
    let mut cancelled = false;

    // Log progress until the submission settles; the first signal cancels it
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(SubmissionEvent::TransactionHash(hash)) => info!("Broadcast {:?}", hash),
                Some(SubmissionEvent::Mined(receipt)) => info!(
                    "Mined {:?} in block {:?}",
                    receipt.transaction_hash, receipt.block_number
                ),
                Some(SubmissionEvent::Confirmations(count)) => info!("{} confirmations", count),
                None => break,
            },
            _ = &mut shutdown, if !cancelled => {
                cancelled = true;
                info!("Shutdown signal received, cancelling the transaction...");
                if let Err(e) = submission.cancel().await {
                    warn!("Cancellation failed: {}", e);
                }
            }
        }
    }

    let outcome = handle.wait().await;

    if let Some(h) = metrics_handle {
        h.abort();
    }

    match outcome {
        Ok(receipt) => {
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            info!("Eth Tx Manager stopped");
            Ok(())
        }
        Err(e) => {
            error!("Submission failed: {}", e);
            Err(e.into())
        }
    }
}

fn build_intent(config: &TransactionConfig) -> Result<TransactionIntent> {
    let to: Address = config
        .to
        .parse()
        .with_context(|| format!("Invalid recipient address: {}", config.to))?;
    let mut intent = TransactionIntent::new(to);

    if let Some(value) = &config.value_wei {
        let value = U256::from_dec_str(value).with_context(|| format!("Invalid value: {}", value))?;
        intent = intent.value(value);
    }
    if let Some(data) = &config.data {
        let data = hex::decode(data.trim_start_matches("0x")).context("Invalid calldata")?;
        intent = intent.data(Bytes::from(data));
    }
    if let Some(gas_limit) = config.gas_limit {
        intent = intent.gas_limit(gas_limit);
    }
    if let Some(gwei) = config.gas_price_gwei {
        intent = intent.gas_price(gwei_to_wei(gwei));
    }

    Ok(intent)
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eth_tx_manager=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
