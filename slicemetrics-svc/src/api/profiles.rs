//! Profile listing and reload endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::ApiResult;
use crate::models::ProfileKind;
use crate::services::ProfileStore;
use crate::AppState;

/// Profile names by kind
#[derive(Debug, Serialize)]
pub struct ProfileListResponse {
    pub profiles: BTreeMap<String, Vec<String>>,
}

impl ProfileListResponse {
    fn from_store(store: &ProfileStore) -> Self {
        let profiles = ProfileKind::ALL
            .iter()
            .map(|kind| {
                let names = store.names(*kind).into_iter().map(str::to_string).collect();
                (kind.to_string(), names)
            })
            .collect();
        Self { profiles }
    }
}

/// GET /profiles
pub async fn list_profiles(State(state): State<AppState>) -> Json<ProfileListResponse> {
    let store = state.service.profiles().await;
    Json(ProfileListResponse::from_store(&store))
}

/// POST /profiles/reload
///
/// Re-reads the profile directories. On failure the previous profiles stay
/// active.
pub async fn reload_profiles(State(state): State<AppState>) -> ApiResult<Json<ProfileListResponse>> {
    match state.service.reload_profiles().await {
        Ok(store) => Ok(Json(ProfileListResponse::from_store(&store))),
        Err(e) => {
            tracing::error!(error = %e, "Profile reload failed");
            state.record_error(e.to_string()).await;
            Err(e.into())
        }
    }
}

/// Build profile routes
pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profiles", get(list_profiles))
        .route("/profiles/reload", post(reload_profiles))
}
