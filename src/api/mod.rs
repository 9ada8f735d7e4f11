//! Read-mostly admin HTTP API.
//!
//! Serves snapshots of the source and policy state and accepts policy
//! mutations. Everything it reads is a deep copy; it never holds core
//! locks across a response.

use std::io;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::source::{
    AvoidPolicy, BlockPolicy, Dialer, Policy, PolicySnapshot, ReservedPolicy, SourceSnapshot,
    SourceStore, StickyPolicy,
};

/// Build-time and configuration facts exposed on `/info`.
#[derive(Debug, Clone, Serialize)]
pub struct StaticInfo {
    pub version: String,
    pub commit: String,
    pub build_time: String,
    pub proxy_port: u16,
    pub proxy_proto: String,
}

#[derive(Clone)]
struct AppState {
    store: Arc<SourceStore>,
    dialer: Arc<Dialer>,
    info: Arc<StaticInfo>,
}

#[derive(Debug, Deserialize)]
struct PolicyRequest {
    kind: String,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    target: Option<String>,
    issuer: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct PolicyCreated {
    id: String,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

pub fn router(store: Arc<SourceStore>, dialer: Arc<Dialer>, info: StaticInfo) -> Router {
    let state = AppState {
        store,
        dialer,
        info: Arc::new(info),
    };
    Router::new()
        .route("/sources", get(list_sources))
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/:id", delete(remove_policy))
        .route("/info", get(static_info))
        .with_state(state)
}

/// Bind the admin API on `port` and serve until `token` is cancelled.
pub async fn serve(
    port: u16,
    store: Arc<SourceStore>,
    dialer: Arc<Dialer>,
    info: StaticInfo,
    token: CancellationToken,
) -> io::Result<()> {
    let app = router(store, dialer, info);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(target = "api", port, "admin api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceSnapshot>> {
    Json(state.store.get_sources_snapshot())
}

async fn list_policies(State(state): State<AppState>) -> Json<Vec<PolicySnapshot>> {
    Json(state.store.get_policies_snapshot())
}

async fn static_info(State(state): State<AppState>) -> Json<StaticInfo> {
    Json(state.info.as_ref().clone())
}

async fn create_policy(
    State(state): State<AppState>,
    Json(req): Json<PolicyRequest>,
) -> Result<Json<PolicyCreated>, (StatusCode, Json<ApiError>)> {
    let policy = build_policy(&state, &req).map_err(|msg| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: msg.to_string(),
            }),
        )
    })?;
    let id = policy.id().to_string();
    state.store.add_policy(policy);
    Ok(Json(PolicyCreated { id }))
}

async fn remove_policy(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.store.del_policy(&id);
    StatusCode::NO_CONTENT
}

fn build_policy(state: &AppState, req: &PolicyRequest) -> Result<Arc<dyn Policy>, &'static str> {
    let source_id = || req.source_id.as_deref().ok_or("source_id is required");
    let target = || req.target.as_deref().ok_or("target is required");

    let policy: Arc<dyn Policy> = match req.kind.as_str() {
        "block" => {
            let p = BlockPolicy::new(&req.issuer, source_id()?);
            Arc::new(match &req.reason {
                Some(reason) => p.with_reason(reason),
                None => p,
            })
        }
        "reserve" => {
            let p = ReservedPolicy::new(&req.issuer, source_id()?, target()?);
            Arc::new(match &req.reason {
                Some(reason) => p.with_reason(reason),
                None => p,
            })
        }
        "avoid" => {
            let p = AvoidPolicy::new(&req.issuer, source_id()?, target()?);
            Arc::new(match &req.reason {
                Some(reason) => p.with_reason(reason),
                None => p,
            })
        }
        "sticky" => Arc::new(StickyPolicy::new(
            &req.issuer,
            state.dialer.history_lookup(),
        )),
        _ => return Err("unknown policy kind (available: block, reserve, avoid, sticky)"),
    };
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::Balancer;

    fn state() -> AppState {
        let store = Arc::new(SourceStore::new());
        let balancer = Arc::new(Balancer::new(store.clone()));
        AppState {
            store,
            dialer: Arc::new(Dialer::new(balancer)),
            info: Arc::new(StaticInfo {
                version: "test".to_string(),
                commit: "none".to_string(),
                build_time: "now".to_string(),
                proxy_port: 1080,
                proxy_proto: "socks5".to_string(),
            }),
        }
    }

    #[test]
    fn build_policy_constructs_each_kind() {
        let state = state();
        let req = PolicyRequest {
            kind: "block".to_string(),
            source_id: Some("eth0".to_string()),
            target: None,
            issuer: "api".to_string(),
            reason: Some("maintenance".to_string()),
        };
        let p = build_policy(&state, &req).unwrap();
        assert_eq!(p.id(), "block_eth0");

        let req = PolicyRequest {
            kind: "reserve".to_string(),
            source_id: Some("eth0".to_string()),
            target: Some("vpn.corp:443".to_string()),
            issuer: "api".to_string(),
            reason: None,
        };
        assert_eq!(
            build_policy(&state, &req).unwrap().id(),
            "reserve_eth0_for_vpn.corp:443"
        );

        let req = PolicyRequest {
            kind: "sticky".to_string(),
            source_id: None,
            target: None,
            issuer: "api".to_string(),
            reason: None,
        };
        assert_eq!(build_policy(&state, &req).unwrap().id(), "stick");
    }

    #[test]
    fn build_policy_rejects_missing_fields() {
        let state = state();
        let req = PolicyRequest {
            kind: "reserve".to_string(),
            source_id: Some("eth0".to_string()),
            target: None,
            issuer: "api".to_string(),
            reason: None,
        };
        assert!(build_policy(&state, &req).is_err());

        let req = PolicyRequest {
            kind: "mystery".to_string(),
            source_id: None,
            target: None,
            issuer: "api".to_string(),
            reason: None,
        };
        assert!(build_policy(&state, &req).is_err());
    }
}
