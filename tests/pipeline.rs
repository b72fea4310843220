//! End-to-end flow: text request -> inference drafts -> persisted entries ->
//! streamed frames, against a file-backed database.

use futures::StreamExt;
use uuid::Uuid;

use finance_backend::accounts::{create_account, AccountCreate};
use finance_backend::categories::{create_categories, CategoryCreate};
use finance_backend::inference::{AccountRef, Draft, FixedInference, InferenceClient};
use finance_backend::jobs::JobBus;
use finance_backend::orchestrator::{run_inference_job, TransactionTextCreateRequest};
use finance_backend::routes::AppState;
use finance_backend::schema;
use finance_backend::stream::{frames, Frame};
use finance_backend::transactions::{list_transactions, EntryType, TransactionPublic};

async fn file_backed_state(dir: &tempfile::TempDir, inference: FixedInference) -> AppState {
    let url = format!("sqlite://{}", dir.path().join("pipeline.db").display());
    let pool = schema::connect(&url).await.expect("connect");
    schema::migrate(&pool).await.expect("migrate");
    schema::seed_reserved_rows(&pool).await.expect("seed");
    AppState {
        pool,
        jobs: JobBus::default(),
        inference: InferenceClient::Fixed(inference),
    }
}

#[tokio::test]
async fn text_request_streams_persisted_entries_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = file_backed_state(&dir, FixedInference::default()).await;

    let chequing = create_account(
        &state.pool,
        &AccountCreate {
            user_id: 1,
            name: "Chequing".into(),
            currency: "CAD".into(),
            initial_balance: 1000.0,
        },
    )
    .await
    .expect("account")
    .id;
    let savings = create_account(
        &state.pool,
        &AccountCreate {
            user_id: 1,
            name: "Savings".into(),
            currency: "CAD".into(),
            initial_balance: 0.0,
        },
    )
    .await
    .expect("account")
    .id;
    create_categories(
        &state.pool,
        &[CategoryCreate {
            user_id: 1,
            name: "Food".into(),
            entry_type: EntryType::Debit,
        }],
    )
    .await
    .expect("category");

    let state = AppState {
        inference: InferenceClient::Fixed(FixedInference {
            drafts: vec![
                Draft::Transaction {
                    name: "Lunch".into(),
                    amount: 12.5,
                    category_name: "Food".into(),
                    date: "2030-01-10".into(),
                },
                Draft::BankTransfer {
                    bank_from: AccountRef {
                        id: chequing,
                        name: "Chequing".into(),
                    },
                    bank_to: AccountRef {
                        id: savings,
                        name: "Savings".into(),
                    },
                    amount: 200.0,
                    date: "2030-01-11".into(),
                },
            ],
            ..Default::default()
        }),
        ..state
    };

    let job_id = Uuid::new_v4();
    let request = TransactionTextCreateRequest {
        text: "Lunch 12.50, moved 200 to savings".into(),
        account_id: chequing,
        user_id: 1,
    };

    // Attach before the job runs so the stream exercises the live path too.
    let stream = frames(state.jobs.clone(), job_id);
    futures::pin_mut!(stream);

    run_inference_job(state.clone(), request, job_id).await;

    let mut entries: Vec<TransactionPublic> = Vec::new();
    while let Some(frame) = stream.next().await {
        match frame {
            Frame::Message(data) => {
                entries.push(serde_json::from_str(&data).expect("frame json"))
            }
            Frame::Done => break,
        }
    }

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].name, "Lunch");
    assert_eq!(entries[0].running_balance, 987.5);
    assert_eq!(entries[1].name, "To Savings");
    assert_eq!(entries[1].account_id, chequing);
    assert_eq!(entries[1].running_balance, 787.5);
    assert_eq!(entries[2].name, "From Chequing");
    assert_eq!(entries[2].account_id, savings);
    assert_eq!(entries[2].running_balance, 200.0);

    // The ledger agrees with what was streamed: three real entries plus the
    // two synthetic initial-balance rows.
    let listed = list_transactions(&state.pool, 1).await.expect("list");
    assert_eq!(listed.len(), 5);
    assert_eq!(listed.iter().filter(|t| t.id > 0).count(), 3);
}

#[tokio::test]
async fn empty_draft_set_still_terminates_the_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = file_backed_state(&dir, FixedInference::default()).await;
    create_account(
        &state.pool,
        &AccountCreate {
            user_id: 1,
            name: "Chequing".into(),
            currency: "CAD".into(),
            initial_balance: 0.0,
        },
    )
    .await
    .expect("account");

    let job_id = Uuid::new_v4();
    run_inference_job(
        state.clone(),
        TransactionTextCreateRequest {
            text: "nothing actionable".into(),
            account_id: 1,
            user_id: 1,
        },
        job_id,
    )
    .await;

    let collected: Vec<Frame> = frames(state.jobs.clone(), job_id).collect().await;
    assert_eq!(collected, vec![Frame::Done]);
}
