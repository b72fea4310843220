use axum::extract::State;
use axum::Json;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::ApiError;
use crate::routes::AppState;
use crate::schema::{public_date, utc_now_ms};

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct UserPublic {
    pub id: i64,
    pub created_at: String,
}

impl From<UserRow> for UserPublic {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            created_at: public_date(r.created_at),
        }
    }
}

pub async fn create_user(pool: &SqlitePool) -> Result<UserRow, ApiError> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (created_at) VALUES (?) RETURNING id, created_at",
    )
    .bind(utc_now_ms())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<UserRow>, ApiError> {
    let rows = sqlx::query_as::<_, UserRow>("SELECT id, created_at FROM users ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn create_user_handler(
    State(state): State<AppState>,
) -> Result<Json<UserPublic>, ApiError> {
    let row = create_user(&state.pool).await?;
    Ok(Json(row.into()))
}

pub async fn list_users_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserPublic>>, ApiError> {
    let rows = list_users(&state.pool).await?;
    Ok(Json(rows.into_iter().map(UserPublic::from).collect()))
}
