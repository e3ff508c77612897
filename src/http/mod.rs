use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QuerySelect};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::assignment::AssignError;
use crate::entities::{user_registry, wallet_pool_entry};
use crate::state::AppState;

mod admin;
mod register;

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    // The Mini App front-end is served from Telegram's origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let admin_router = admin::router().with_state(state.clone());
    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .merge(register::router().with_state(state.clone()))
        .nest("/admin", admin_router)
        .layer(cors)
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    assert!(
        uptime <= 31_536_000,
        "Uptime exceeds one year without restart"
    );
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .database
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    // One grouped query so the free/total pair is a consistent snapshot even
    // while seeding or assignment runs concurrently.
    let occupancy_rows: Vec<(bool, i64)> = wallet_pool_entry::Entity::find()
        .select_only()
        .column(wallet_pool_entry::Column::Assigned)
        .column_as(wallet_pool_entry::Column::Id.count(), "count")
        .group_by(wallet_pool_entry::Column::Assigned)
        .into_tuple()
        .all(state.database.as_ref())
        .await
        .map_err(|err| HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let (wallets_total, wallets_free) = pool_occupancy(&occupancy_rows);

    let users_registered = user_registry::Entity::find()
        .count(state.database.as_ref())
        .await
        .map_err(|err| HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    let response = ReadyResponse {
        status: "ready",
        wallets_total,
        wallets_free,
        users_registered,
        cache_entries: state.cache.assignments.entry_count(),
    };
    Ok(Json(response))
}

/// Folds `(assigned, count)` group rows into `(total, free)`.
fn pool_occupancy(rows: &[(bool, i64)]) -> (u64, u64) {
    let mut total = 0u64;
    let mut free = 0u64;
    for (assigned, count) in rows {
        assert!(*count >= 0, "Group count cannot be negative");
        let count = *count as u64;
        total += count;
        if !*assigned {
            free += count;
        }
    }
    (total, free)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    wallets_total: u64,
    wallets_free: u64,
    users_registered: u64,
    cache_entries: u64,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }

    pub fn internal(message: String) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<AssignError> for HttpError {
    fn from(err: AssignError) -> Self {
        let status = match &err {
            AssignError::Exhausted | AssignError::AlreadyAssigned(_) => StatusCode::CONFLICT,
            AssignError::WalletNotFound(_) => StatusCode::BAD_REQUEST,
            AssignError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpError::new(status, err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbErr;

    #[test]
    fn pool_occupancy_folds_group_rows() {
        let (total, free) = pool_occupancy(&[(false, 3), (true, 5)]);
        assert_eq!(total, 8);
        assert_eq!(free, 3);
        assert!(free <= total);
    }

    #[test]
    fn pool_occupancy_of_empty_pool_is_zero() {
        assert_eq!(pool_occupancy(&[]), (0, 0));
    }

    #[test]
    fn assign_errors_map_to_distinct_statuses() {
        let exhausted: HttpError = AssignError::Exhausted.into();
        assert_eq!(exhausted.status, StatusCode::CONFLICT);

        let taken: HttpError = AssignError::AlreadyAssigned("T123".to_string()).into();
        assert_eq!(taken.status, StatusCode::CONFLICT);

        let missing: HttpError = AssignError::WalletNotFound("T123".to_string()).into();
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);

        let opaque: HttpError = AssignError::Db(DbErr::Custom("boom".to_string())).into();
        assert_eq!(opaque.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
