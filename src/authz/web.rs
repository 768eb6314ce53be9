use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::authz::errors::AuthzError;
use crate::authz::service::AclAdminService;
use crate::authz::types::*;
use crate::directory::PrincipalSource;

#[derive(Clone)]
pub struct AppState {
    pub service: AclAdminService,
    pub directory: Arc<dyn PrincipalSource>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/authorize", post(handle_authorize))
        .route("/v1/acls", get(list_acls))
        .route(
            "/v1/acls/{name}",
            get(get_acl).put(update_acl).delete(delete_acl),
        )
        .route("/v1/evaluators", get(list_evaluators))
        .route("/v1/evaluators/operators", get(list_evaluator_operators))
        .route(
            "/v1/evaluators/{type}",
            get(get_evaluator).put(add_evaluator).delete(remove_evaluator),
        )
        .route("/healthz", get(health))
        .with_state(state)
}

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
///
/// The peer address is attached when the server runs with connect info.
pub struct Caller(pub Principal);

impl FromRequestParts<AppState> for Caller {
    type Rejection = AuthzError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(AuthzError::Unauthenticated)?;

        let mut principal = state
            .directory
            .resolve_token(token)
            .ok_or(AuthzError::Unauthenticated)?;

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            principal = principal.with_remote_addr(addr.ip());
        }
        Ok(Caller(principal))
    }
}

async fn handle_authorize(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<AuthorizeRequest>,
) -> impl IntoResponse {
    let decision = state.service.authorize(&caller, &req.resource, &req.right);
    Json(AuthorizeResponse::from(decision))
}

async fn list_acls(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<ResourceSummary>>, AuthzError> {
    state.service.list_acls(&caller).map(Json)
}

async fn get_acl(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<Json<AclView>, AuthzError> {
    state.service.get_acl(&caller, &name).map(Json)
}

async fn update_acl(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    Json(req): Json<UpdateAclRequest>,
) -> Result<Json<AclView>, AuthzError> {
    state.service.update_acl(&caller, &name, &req).map(Json)
}

async fn delete_acl(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<StatusCode, AuthzError> {
    state.service.delete_acl(&caller, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_evaluators(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<EvaluatorSummary>>, AuthzError> {
    state.service.list_evaluators(&caller).map(Json)
}

async fn list_evaluator_operators(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<EvaluatorOperators>>, AuthzError> {
    state.service.list_evaluator_operators(&caller).map(Json)
}

async fn get_evaluator(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(evaluator_type): Path<String>,
) -> Result<Json<EvaluatorOperators>, AuthzError> {
    state.service.get_evaluator(&caller, &evaluator_type).map(Json)
}

async fn add_evaluator(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(evaluator_type): Path<String>,
    Json(req): Json<AddEvaluatorRequest>,
) -> Result<StatusCode, AuthzError> {
    state
        .service
        .add_evaluator(&caller, &evaluator_type, &req.implementation)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_evaluator(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(evaluator_type): Path<String>,
) -> Result<StatusCode, AuthzError> {
    state.service.remove_evaluator(&caller, &evaluator_type)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
