use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::accounts::account_refs;
use crate::categories::{self, TRANSFER, UNKNOWN};
use crate::error::ApiError;
use crate::inference::{AccountRef, Draft};
use crate::jobs::JobMessage;
use crate::routes::AppState;
use crate::transactions::{
    create_transaction, get_transaction, EntryType, TransactionCreate,
};

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionTextCreateRequest {
    pub text: String,
    /// Account simple drafts land on; transfers carry their own endpoints.
    pub account_id: i64,
    pub user_id: i64,
}

/// Kicks off a detached inference job and hands the caller its id
/// immediately. Progress is consumed via the stream endpoint.
pub async fn create_by_text_handler(
    State(state): State<AppState>,
    Json(req): Json<TransactionTextCreateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job_id = Uuid::new_v4();
    tokio::spawn(run_inference_job(state, req, job_id));
    Ok(Json(json!({ "job_id": job_id })))
}

/// Turns one text input into zero or more ledger entries, publishing each to
/// the job's channel as it materializes. A draft that cannot be processed is
/// logged and skipped; the terminal marker is always published.
pub async fn run_inference_job(state: AppState, req: TransactionTextCreateRequest, job_id: Uuid) {
    let drafts = match gather_drafts(&state, &req).await {
        Ok(drafts) => drafts,
        Err(e) => {
            tracing::error!(%job_id, "inference failed for {:?}: {e}", req.text);
            state.jobs.finish(job_id);
            return;
        }
    };

    for draft in drafts {
        let result = match draft {
            Draft::Transaction {
                name,
                amount,
                category_name,
                date,
            } => process_simple_draft(&state, &req, job_id, name, amount, category_name, date).await,
            Draft::BankTransfer {
                bank_from,
                bank_to,
                amount,
                date,
            } => process_transfer_draft(&state, &req, job_id, bank_from, bank_to, amount, date).await,
        };
        if let Err(e) = result {
            tracing::error!(%job_id, "draft skipped: {e}");
        }
    }

    state.jobs.finish(job_id);
}

async fn gather_drafts(
    state: &AppState,
    req: &TransactionTextCreateRequest,
) -> Result<Vec<Draft>, ApiError> {
    let category_names: Vec<String> = categories::list_for_user(&state.pool)
        .await?
        .into_iter()
        .map(|c| c.lower_cased_name)
        .collect();
    let accounts = account_refs(&state.pool, req.user_id).await?;
    state
        .inference
        .infer_drafts(&req.text, &category_names, &accounts)
        .await
        .map_err(|e| ApiError::External(e.to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn process_simple_draft(
    state: &AppState,
    req: &TransactionTextCreateRequest,
    job_id: Uuid,
    name: String,
    amount: f64,
    category_name: String,
    date: String,
) -> Result<(), ApiError> {
    let category = categories::by_lower_name(&state.pool, &category_name.to_lowercase())
        .await?
        .ok_or(ApiError::NotFound("category"))?;

    let suggested_categories = if category.lower_cased_name == UNKNOWN {
        tracing::debug!(%job_id, "draft `{name}` uncategorized, requesting suggestions");
        suggest_category_ids(state, &req.text).await
    } else {
        Vec::new()
    };

    let create = TransactionCreate {
        user_id: req.user_id,
        account_id: req.account_id,
        category_id: category.id,
        name,
        amount,
        entry_type: category.entry_type,
        date: Some(date),
        suggested_categories,
    };
    persist_and_publish(state, job_id, &create).await
}

#[allow(clippy::too_many_arguments)]
async fn process_transfer_draft(
    state: &AppState,
    req: &TransactionTextCreateRequest,
    job_id: Uuid,
    bank_from: AccountRef,
    bank_to: AccountRef,
    amount: f64,
    date: String,
) -> Result<(), ApiError> {
    let debit = categories::by_lower_name_and_type(&state.pool, TRANSFER, EntryType::Debit)
        .await?
        .ok_or(ApiError::NotFound("transfer debit category"))?;
    let credit = categories::by_lower_name_and_type(&state.pool, TRANSFER, EntryType::Credit)
        .await?
        .ok_or(ApiError::NotFound("transfer credit category"))?;

    // Debit leg first, then the matching credit; each leg is published
    // independently.
    let outgoing = TransactionCreate {
        user_id: req.user_id,
        account_id: bank_from.id,
        category_id: debit.id,
        name: format!("To {}", bank_to.name),
        amount,
        entry_type: EntryType::Debit,
        date: Some(date.clone()),
        suggested_categories: Vec::new(),
    };
    persist_and_publish(state, job_id, &outgoing).await?;

    let incoming = TransactionCreate {
        user_id: req.user_id,
        account_id: bank_to.id,
        category_id: credit.id,
        name: format!("From {}", bank_from.name),
        amount,
        entry_type: EntryType::Credit,
        date: Some(date),
        suggested_categories: Vec::new(),
    };
    persist_and_publish(state, job_id, &incoming).await
}

/// Persists a draft, re-reads the enriched public view so the published
/// message carries the computed running balance, then publishes it.
async fn persist_and_publish(
    state: &AppState,
    job_id: Uuid,
    create: &TransactionCreate,
) -> Result<(), ApiError> {
    let row = create_transaction(&state.pool, create).await?;
    tracing::info!(%job_id, id = row.id, "created transaction `{}`", row.name);
    let public = get_transaction(&state.pool, create.user_id, row.id).await?;
    let payload = serde_json::to_string(&public)
        .map_err(|e| ApiError::Validation(format!("serialize transaction: {e}")))?;
    state.jobs.publish(job_id, JobMessage::Entry(payload));
    Ok(())
}

/// Maps the user's known category names (minus the unknown bucket) through
/// the suggestion capability and back to ids. Any failure degrades to an
/// empty list.
async fn suggest_category_ids(state: &AppState, text: &str) -> Vec<i64> {
    let names: Vec<String> = match categories::list_for_user(&state.pool).await {
        Ok(rows) => rows
            .into_iter()
            .map(|c| c.lower_cased_name)
            .filter(|n| n != UNKNOWN)
            .collect(),
        Err(e) => {
            tracing::error!("category listing failed during suggestion: {e}");
            return Vec::new();
        }
    };

    let suggested = match state.inference.suggest_categories(text, &names).await {
        Ok(Some(names)) => names,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::error!("category suggestion failed: {e}");
            return Vec::new();
        }
    };

    let lowered: Vec<String> = suggested.iter().map(|n| n.to_lowercase()).collect();
    match categories::by_lower_names(&state.pool, &lowered).await {
        Ok(rows) => rows.into_iter().map(|c| c.id).collect(),
        Err(e) => {
            tracing::error!("mapping suggested names to ids failed: {e}");
            Vec::new()
        }
    }
}
