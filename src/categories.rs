use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::ApiError;
use crate::inference::CategoryDraft;
use crate::routes::AppState;
use crate::transactions::EntryType;

/// Lower-cased name of the fallback bucket assigned when inference cannot
/// categorize a draft.
pub const UNKNOWN: &str = "unknown";
/// Lower-cased name of the reserved pair used for account-to-account moves.
pub const TRANSFER: &str = "transfer";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub lower_cased_name: String,
    pub entry_type: EntryType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryCreate {
    pub user_id: i64,
    pub name: String,
    pub entry_type: EntryType,
}

#[derive(Debug, Deserialize)]
pub struct CategoryCreateRequest {
    pub category_create_list: Vec<CategoryCreate>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryGetRequest {
    pub category_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CategorySuggestRequest {
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CategoryPublic {
    pub id: i64,
    pub name: String,
    pub entry_type: EntryType,
}

impl From<CategoryRow> for CategoryPublic {
    fn from(r: CategoryRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            entry_type: r.entry_type,
        }
    }
}

const COLUMNS: &str = "id, user_id, name, lower_cased_name, entry_type";

pub async fn by_id(pool: &SqlitePool, category_id: i64) -> Result<Option<CategoryRow>, ApiError> {
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, user_id, name, lower_cased_name, entry_type FROM categories WHERE id = ?",
    )
    .bind(category_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn by_lower_name(
    pool: &SqlitePool,
    lower_cased_name: &str,
) -> Result<Option<CategoryRow>, ApiError> {
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, user_id, name, lower_cased_name, entry_type FROM categories
         WHERE lower_cased_name = ? LIMIT 1",
    )
    .bind(lower_cased_name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Used for the two reserved Transfer rows, which share a name and differ
/// only by entry type.
pub async fn by_lower_name_and_type(
    pool: &SqlitePool,
    lower_cased_name: &str,
    entry_type: EntryType,
) -> Result<Option<CategoryRow>, ApiError> {
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, user_id, name, lower_cased_name, entry_type FROM categories
         WHERE lower_cased_name = ? AND entry_type = ? LIMIT 1",
    )
    .bind(lower_cased_name)
    .bind(entry_type)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn by_lower_names(
    pool: &SqlitePool,
    names: &[String],
) -> Result<Vec<CategoryRow>, ApiError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {COLUMNS} FROM categories WHERE lower_cased_name IN ("
    ));
    let mut separated = qb.separated(", ");
    for name in names {
        separated.push_bind(name);
    }
    qb.push(")");
    let rows = qb.build_query_as::<CategoryRow>().fetch_all(pool).await?;
    Ok(rows)
}

/// Categories shown to the user. The reserved "transfer" rows are hidden;
/// "others" is excluded by name as well, mirroring the original product
/// behavior (see DESIGN.md).
pub async fn list_for_user(pool: &SqlitePool) -> Result<Vec<CategoryRow>, ApiError> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, user_id, name, lower_cased_name, entry_type FROM categories
         WHERE lower_cased_name != 'transfer' AND lower_cased_name != 'others'
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Bulk insert. The lookup key is derived from the display name exactly once,
/// here, and never recomputed.
pub async fn create_categories(
    pool: &SqlitePool,
    category_create_list: &[CategoryCreate],
) -> Result<Vec<CategoryRow>, ApiError> {
    let mut tx = pool.begin().await?;
    let mut rows = Vec::with_capacity(category_create_list.len());
    for category in category_create_list {
        let row = sqlx::query_as::<_, CategoryRow>(
            "INSERT INTO categories (user_id, name, lower_cased_name, entry_type)
             VALUES (?, ?, ?, ?)
             RETURNING id, user_id, name, lower_cased_name, entry_type",
        )
        .bind(category.user_id)
        .bind(&category.name)
        .bind(category.name.to_lowercase())
        .bind(category.entry_type)
        .fetch_one(&mut *tx)
        .await?;
        rows.push(row);
    }
    tx.commit().await?;
    Ok(rows)
}

pub async fn create_categories_handler(
    State(state): State<AppState>,
    Json(req): Json<CategoryCreateRequest>,
) -> Result<Json<Vec<CategoryPublic>>, ApiError> {
    let rows = create_categories(&state.pool, &req.category_create_list).await?;
    Ok(Json(rows.into_iter().map(CategoryPublic::from).collect()))
}

pub async fn list_categories_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategoryPublic>>, ApiError> {
    let rows = list_for_user(&state.pool).await?;
    Ok(Json(rows.into_iter().map(CategoryPublic::from).collect()))
}

pub async fn get_category_handler(
    State(state): State<AppState>,
    Json(req): Json<CategoryGetRequest>,
) -> Result<Json<CategoryPublic>, ApiError> {
    let row = by_id(&state.pool, req.category_id)
        .await?
        .ok_or(ApiError::NotFound("category"))?;
    Ok(Json(row.into()))
}

/// Advisory only: asks the inference backend for up to 7 category drafts
/// tailored to the user's summary. Nothing is persisted.
pub async fn suggest_categories_handler(
    State(state): State<AppState>,
    Json(req): Json<CategorySuggestRequest>,
) -> Result<Json<Vec<CategoryDraft>>, ApiError> {
    let drafts = state
        .inference
        .suggest_category_set(req.text.as_deref())
        .await
        .map_err(|e| ApiError::External(e.to_string()))?;
    Ok(Json(drafts))
}
