//! Operator endpoints: registry listing, pool listing and seeding, and
//! forced assignment. Everything here sits behind a shared-secret bearer
//! credential; none of it adds concurrency logic beyond what
//! [`crate::assignment`] already guarantees.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assignment;
use crate::entities::{user_registry, wallet_pool_entry};
use crate::state::AppState;
use crate::telegram;

use super::HttpError;

/// Upper bound on a single seeding batch
pub const MAX_SEED_BATCH: usize = 10_000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/wallets", get(list_wallets).post(insert_wallets))
        .route("/assign", post(force_assign))
}

/// Rejects the request unless the Authorization header carries the
/// operator-configured bearer token.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if authorize_bearer(header, &state.admin_token) {
            Ok(AdminAuth)
        } else {
            Err(HttpError::new(
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
            ))
        }
    }
}

fn authorize_bearer(header: Option<&str>, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    match header {
        Some(value) => value == format!("Bearer {token}"),
        None => false,
    }
}

#[derive(Debug, Serialize)]
struct UserView {
    user_id: String,
    address: String,
}

#[derive(Debug, Serialize)]
struct UsersResponse {
    users: Vec<UserView>,
}

async fn list_users(
    State(state): State<AppState>,
    _auth: AdminAuth,
) -> Result<Json<UsersResponse>, HttpError> {
    let rows = user_registry::Entity::find()
        .order_by_asc(user_registry::Column::UserId)
        .all(state.database.as_ref())
        .await
        .map_err(|err| HttpError::internal(err.to_string()))?;

    let users = rows
        .into_iter()
        .map(|row| UserView {
            user_id: row.user_id,
            address: row.address,
        })
        .collect();

    Ok(Json(UsersResponse { users }))
}

#[derive(Debug, Deserialize, Default)]
struct WalletsQuery {
    /// Case-insensitive substring match over the address
    q: Option<String>,
    only_free: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WalletsResponse {
    wallets: Vec<wallet_pool_entry::Model>,
}

async fn list_wallets(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<WalletsQuery>,
) -> Result<Json<WalletsResponse>, HttpError> {
    let mut select =
        wallet_pool_entry::Entity::find().order_by_asc(wallet_pool_entry::Column::Id);

    if let Some(q) = query.q.as_deref() {
        if !q.is_empty() {
            select = select.filter(
                Expr::col((
                    wallet_pool_entry::Entity,
                    wallet_pool_entry::Column::Address,
                ))
                .ilike(format!("%{q}%")),
            );
        }
    }
    if query.only_free.unwrap_or(false) {
        select = select.filter(wallet_pool_entry::Column::Assigned.eq(false));
    }

    let wallets = select
        .all(state.database.as_ref())
        .await
        .map_err(|err| HttpError::internal(err.to_string()))?;

    Ok(Json(WalletsResponse { wallets }))
}

#[derive(Debug, Deserialize)]
struct NewWallet {
    address: String,
    seed: String,
}

#[derive(Debug, Deserialize)]
struct InsertWalletsRequest {
    wallets: Vec<NewWallet>,
}

#[derive(Debug, Serialize)]
struct InsertWalletsResponse {
    inserted: u64,
}

async fn insert_wallets(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(request): Json<InsertWalletsRequest>,
) -> Result<Json<InsertWalletsResponse>, HttpError> {
    let rows = validate_batch(&request.wallets)
        .map_err(|message| HttpError::new(StatusCode::BAD_REQUEST, message))?;

    let models: Vec<wallet_pool_entry::ActiveModel> = rows
        .into_iter()
        .map(|(address, seed)| wallet_pool_entry::ActiveModel {
            id: sea_orm::ActiveValue::NotSet,
            address: Set(address),
            seed: Set(seed),
            assigned: Set(false),
            assigned_user_id: Set(None),
            assigned_at: Set(None),
        })
        .collect();

    // Single multi-row INSERT: the batch lands all-or-nothing, and a
    // duplicate address fails the whole batch.
    let inserted = wallet_pool_entry::Entity::insert_many(models)
        .exec_without_returning(state.database.as_ref())
        .await
        .map_err(|err| match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(detail)) => HttpError::new(
                StatusCode::CONFLICT,
                format!("Duplicate address in batch: {detail}"),
            ),
            _ => HttpError::internal(err.to_string()),
        })?;

    info!("Seeded {} wallet pool entries", inserted);
    Ok(Json(InsertWalletsResponse { inserted }))
}

/// Checks a seeding batch before it touches the store. Rejects an empty
/// batch, blank fields, and oversized values.
fn validate_batch(wallets: &[NewWallet]) -> Result<Vec<(String, String)>, String> {
    if wallets.is_empty() {
        return Err("Empty wallets".to_string());
    }
    if wallets.len() > MAX_SEED_BATCH {
        return Err(format!("Seeding batch exceeds {MAX_SEED_BATCH} entries"));
    }

    let mut rows = Vec::with_capacity(wallets.len());
    for wallet in wallets {
        let address = wallet.address.trim();
        let seed = wallet.seed.trim();
        if address.is_empty() || seed.is_empty() {
            return Err("Wallet address and seed must be non-empty".to_string());
        }
        if address.len() > 128 {
            return Err(format!("Address exceeds 128 character limit: {address}"));
        }
        if seed.len() > 512 {
            return Err("Seed exceeds 512 character limit".to_string());
        }
        rows.push((address.to_string(), seed.to_string()));
    }
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct ForceAssignRequest {
    user_id: Option<String>,
    wallet_address: Option<String>,
}

#[derive(Debug, Serialize)]
struct ForceAssignResponse {
    ok: bool,
    user_id: String,
    address: String,
}

async fn force_assign(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(request): Json<ForceAssignRequest>,
) -> Result<Json<ForceAssignResponse>, HttpError> {
    let user_id = request
        .user_id
        .as_deref()
        .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, "user_id required".to_string()))
        .and_then(|raw| {
            telegram::sanitize_user_id(raw)
                .map_err(|err| HttpError::new(StatusCode::BAD_REQUEST, err.to_string()))
        })?;

    let preferred = request
        .wallet_address
        .as_deref()
        .map(str::trim)
        .filter(|addr| !addr.is_empty());

    let outcome = assignment::assign(state.database.as_ref(), &user_id, preferred).await?;
    if outcome.newly_assigned {
        info!(
            "Operator assigned wallet {} to user {}",
            outcome.address, user_id
        );
    }

    // Keep the registration fast path warm; the binding is immutable.
    state
        .cache
        .assignments
        .insert(user_id.clone(), Arc::from(outcome.address.as_str()))
        .await;

    Ok(Json(ForceAssignResponse {
        ok: true,
        user_id,
        address: outcome.address,
    }))
}
