//! Registration endpoint: hands the calling Telegram user a deposit address.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assignment;
use crate::state::AppState;
use crate::telegram::{self, INIT_DATA_HEADER};

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new().route("/register", post(register))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Direct user id; takes precedence over the init-data header
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub address: String,
}

async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RegisterRequest>>,
) -> Result<Json<RegisterResponse>, HttpError> {
    let user_id = resolve_user_id(&headers, body.as_deref())
        .map_err(|err| HttpError::new(StatusCode::BAD_REQUEST, err.to_string()))?;

    // Registry entries are immutable, so a cache hit is the final answer.
    if let Some(address) = state.cache.assignments.get(&user_id).await {
        return Ok(Json(RegisterResponse {
            user_id,
            address: address.to_string(),
        }));
    }

    let outcome = assignment::assign(state.database.as_ref(), &user_id, None).await?;
    if outcome.newly_assigned {
        info!("Registered user {} with wallet {}", user_id, outcome.address);
    }

    state
        .cache
        .assignments
        .insert(user_id.clone(), Arc::from(outcome.address.as_str()))
        .await;

    Ok(Json(RegisterResponse {
        user_id,
        address: outcome.address,
    }))
}

fn resolve_user_id(headers: &HeaderMap, body: Option<&RegisterRequest>) -> anyhow::Result<String> {
    // An empty body user_id counts as absent and falls back to the header.
    if let Some(direct) = body
        .and_then(|b| b.user_id.as_deref())
        .map(str::trim)
        .filter(|direct| !direct.is_empty())
    {
        return telegram::sanitize_user_id(direct);
    }

    let init_data = headers
        .get(INIT_DATA_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| anyhow::anyhow!("No user_id or init data"))?;
    telegram::extract_user_id(init_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_user_id_takes_precedence_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            INIT_DATA_HEADER,
            "user=%7B%22id%22%3A555%7D".parse().expect("header value"),
        );
        let body = RegisterRequest {
            user_id: Some("override".to_string()),
        };
        let resolved = resolve_user_id(&headers, Some(&body)).expect("resolved");
        assert_eq!(resolved, "override");
    }

    #[test]
    fn header_used_when_body_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            INIT_DATA_HEADER,
            "user=%7B%22id%22%3A555%7D".parse().expect("header value"),
        );
        let resolved = resolve_user_id(&headers, None).expect("resolved");
        assert_eq!(resolved, "555");
    }

    #[test]
    fn blank_body_user_id_falls_back_to_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            INIT_DATA_HEADER,
            "user=%7B%22id%22%3A555%7D".parse().expect("header value"),
        );
        let body = RegisterRequest {
            user_id: Some("   ".to_string()),
        };
        let resolved = resolve_user_id(&headers, Some(&body)).expect("resolved");
        assert_eq!(resolved, "555");
    }

    #[test]
    fn unresolvable_identity_is_an_error() {
        let headers = HeaderMap::new();
        assert!(resolve_user_id(&headers, None).is_err());
        let empty_body = RegisterRequest { user_id: None };
        assert!(resolve_user_id(&headers, Some(&empty_body)).is_err());
    }
}
