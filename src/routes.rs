use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use sqlx::SqlitePool;

use crate::inference::InferenceClient;
use crate::jobs::JobBus;
use crate::{accounts, categories, orchestrator, stats, stream, transactions, users};

/// Shared handler state: the connection pool, the per-job message bus, and
/// the inference adapter.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jobs: JobBus,
    pub inference: InferenceClient,
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "finance backend up" }))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/user/create", post(users::create_user_handler))
        .route("/user/get", post(users::list_users_handler))
        .route("/account/create", post(accounts::create_account_handler))
        .route("/accounts/get", post(accounts::list_accounts_handler))
        .route("/category/create", post(categories::create_categories_handler))
        .route("/categories/get", get(categories::list_categories_handler))
        .route("/category/get", post(categories::get_category_handler))
        .route("/category/suggest", post(categories::suggest_categories_handler))
        .route("/transactions/get", post(transactions::list_transactions_handler))
        .route("/transaction/get", post(transactions::get_transaction_handler))
        .route("/transaction/create", post(transactions::create_transaction_handler))
        .route(
            "/transaction/create-by-text",
            post(orchestrator::create_by_text_handler),
        )
        .route(
            "/transaction/stream/:job_id",
            get(stream::stream_transactions_handler),
        )
        .route(
            "/transaction/edit/:transaction_id",
            patch(transactions::edit_transaction_handler),
        )
        .route(
            "/transaction/delete",
            delete(transactions::delete_transaction_handler),
        )
        .route("/stats/expenses/get", post(stats::expenses_handler))
        .route("/stats/expenses/glance", get(stats::expense_averages_handler))
        .route("/stats/net-worth/get", post(stats::net_worth_handler))
        .route("/stats/category/get", post(stats::category_spend_handler))
        .route("/stats/account/get", post(stats::account_glance_handler))
        .with_state(state)
}
