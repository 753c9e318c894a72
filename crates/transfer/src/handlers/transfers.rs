use crate::AppState;
use crate::handlers::{ApiResponse, AppError};
use axum::{Json, extract::State};
use confidential_transfer::solana::{
    balance::load_transfer_intent,
    submit::{CancellationFlag, StepReport},
};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use std::sync::Arc;
use uuid::Uuid;

#[serde_as]
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferRequest {
    #[serde_as(as = "DisplayFromStr")]
    pub recipient: Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub mint: Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub label: String,
    #[serde_as(as = "DisplayFromStr")]
    pub signature: Signature,
}

impl From<&StepReport> for TransactionResult {
    fn from(step: &StepReport) -> Self {
        Self {
            label: step.label.to_string(),
            signature: step.signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub transfer_id: Uuid,
    pub transactions: Vec<TransactionResult>,
}

pub async fn handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTransferRequest>,
) -> Result<ApiResponse<TransferResponse>, AppError> {
    let intent = load_transfer_intent(
        &state.rpc_client,
        &*state.sender,
        &payload.recipient,
        &payload.mint,
        payload.amount,
    )
    .await?;

    // Runs detached so a dropped connection cannot interrupt a step mid-flight.
    let receipt = tokio::spawn(async move {
        state
            .orchestrator
            .transfer(&intent, &CancellationFlag::default())
            .await
    })
    .await
    .map_err(|e| AppError::internal_server_error(anyhow::anyhow!("Failed to join transfer task: {:?}", e)))??;

    Ok(ApiResponse::new(TransferResponse {
        transfer_id: receipt.transfer_id,
        transactions: receipt.steps.iter().map(TransactionResult::from).collect(),
    }))
}
