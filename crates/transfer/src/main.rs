mod handlers;
mod routes;

use anyhow::Result;
use confidential_transfer::{
    config::{Config, SenderSource},
    signer::{KmsSigner, SerialSigner, create_kms_client, keypair_from_base58},
    solana::{ledger::RpcLedger, proof::SdkProvingOracle, transfer::TransferOrchestrator},
};
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::CommitmentConfig};
use solana_signer::Signer;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub type Orchestrator = TransferOrchestrator<RpcLedger, SdkProvingOracle>;

pub struct AppState {
    pub rpc_client: Arc<RpcClient>,
    pub sender: Arc<dyn Signer + Send + Sync>,
    pub orchestrator: Orchestrator,
}

async fn load_sender(source: &SenderSource) -> Result<Arc<dyn Signer + Send + Sync>> {
    let signer: Arc<dyn Signer + Send + Sync> = match source {
        SenderSource::Keypair(encoded) => Arc::new(keypair_from_base58(encoded)?),
        SenderSource::KmsKeyId(key_id) => {
            let kms = create_kms_client().await;
            Arc::new(KmsSigner::connect(&kms, key_id).await?)
        }
    };
    Ok(Arc::new(SerialSigner::new(signer)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("RPC client created for URL: {:?}", &config.rpc_url);
    let rpc_client = Arc::new(RpcClient::new_with_commitment(
        config.rpc_url.clone(),
        CommitmentConfig::confirmed(),
    ));

    let sender = load_sender(&config.sender).await?;
    info!(sender = %sender.pubkey(), "Loaded transfer sender");

    let orchestrator = TransferOrchestrator::new(
        Arc::new(RpcLedger::new(rpc_client.clone())),
        Arc::new(SdkProvingOracle),
        sender.clone(),
        config.orchestrator,
    );

    let state = Arc::new(AppState {
        rpc_client,
        sender,
        orchestrator,
    });

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
