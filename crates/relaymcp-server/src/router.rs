//! Axum router: the OAuth HTTP surface (spec §6 endpoint table) and the MCP
//! message endpoint, wired onto [`AppState`].

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use relaymcp_core::Error;
use relaymcp_oauth::{AuthorizeRequest, RegistrationRequest};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error_mapping::oauth_error_response;
use crate::state::AppState;

const SESSION_ID_HEADER: &str = "x-mcp-session-id";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(metadata))
        .route("/authorize", get(authorize))
        .route("/token", post(token))
        .route("/register", post(register))
        .route("/revoke", post(revoke))
        .route("/mcp", post(mcp_message))
        .with_state(state)
}

async fn metadata(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(&state.oauth.metadata).unwrap_or(json!({})))
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    response_type: String,
    client_id: String,
    redirect_uri: String,
    state: String,
    scope: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    /// The authenticated resource owner. Resource-owner login is outside
    /// this crate's scope (spec §1); callers that front this endpoint with
    /// their own login flow pass the resulting identity through here.
    #[serde(default = "anonymous_user")]
    user_id: String,
}

fn anonymous_user() -> String {
    "anonymous".to_string()
}

async fn authorize(State(state): State<AppState>, Query(query): Query<AuthorizeQuery>) -> Response {
    let request = AuthorizeRequest {
        response_type: query.response_type,
        client_id: query.client_id,
        redirect_uri: query.redirect_uri,
        state: query.state,
        scope: query.scope,
        code_challenge: query.code_challenge,
        code_challenge_method: query.code_challenge_method,
    };

    match state.oauth.authorization.handle_authorize_request(request, &query.user_id).await {
        Ok(outcome) => Redirect::to(&outcome.redirect_url).into_response(),
        Err(error) => oauth_error_response_body(&error),
    }
}

/// Form-encoded `/token` body (spec §6): fields required vary by
/// `grant_type`, so every field is optional here and validated per-branch.
#[derive(Debug, Deserialize)]
struct TokenRequest {
    grant_type: String,
    code: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
}

async fn token(State(state): State<AppState>, Form(request): Form<TokenRequest>) -> Response {
    let result = token_grant(&state, request).await;
    match result {
        Ok(pair) => Json(pair).into_response(),
        Err(error) => oauth_error_response_body(&error),
    }
}

async fn token_grant(state: &AppState, request: TokenRequest) -> relaymcp_core::Result<relaymcp_oauth::TokenPair> {
    match request.grant_type.as_str() {
        "authorization_code" => {
            let code = request.code.ok_or_else(|| Error::validation("code is required"))?;
            let client_id = request.client_id.ok_or_else(|| Error::validation("client_id is required"))?;
            let redirect_uri = request
                .redirect_uri
                .ok_or_else(|| Error::validation("redirect_uri is required"))?;
            state
                .oauth
                .authorization
                .exchange_authorization_code(&code, &client_id, &redirect_uri, request.code_verifier.as_deref())
                .await
        }
        "refresh_token" => {
            let refresh_token = request
                .refresh_token
                .ok_or_else(|| Error::validation("refresh_token is required"))?;
            state.oauth.tokens.refresh(&refresh_token).await
        }
        other => Err(Error::validation(format!("unsupported grant_type {other}"))),
    }
}

async fn register(State(state): State<AppState>, Json(request): Json<RegistrationRequest>) -> Response {
    match state.oauth.clients.register(request).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => oauth_error_response_body(&error),
    }
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    token: String,
}

async fn revoke(State(state): State<AppState>, Form(request): Form<RevokeRequest>) -> Response {
    match state.oauth.tokens.revoke(&request.token).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => oauth_error_response_body(&error),
    }
}

async fn mcp_message(State(state): State<AppState>, headers: HeaderMap, Json(message): Json<Value>) -> Response {
    let session_id = header_str(&headers, SESSION_ID_HEADER);
    let access_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if let Some(last_event_id) = header_str(&headers, LAST_EVENT_ID_HEADER) {
        return match state.manager.replay(last_event_id).await {
            Ok(events) => Json(json!({
                "replayed": events.iter().map(|e| json!({"event_id": e.event_id, "message": e.message})).collect::<Vec<_>>()
            }))
            .into_response(),
            Err(error) => plain_error_response(&error),
        };
    }

    match state.manager.handle_request(session_id, access_token, message).await {
        Ok(outcome) => (
            [(SESSION_ID_HEADER, outcome.session_id.clone())],
            Json(json!({"response": outcome.response, "event_id": outcome.event_id})),
        )
            .into_response(),
        Err(error) => plain_error_response(&error),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn oauth_error_response_body(error: &Error) -> Response {
    let (status, body) = oauth_error_response(error);
    (status, Json(body)).into_response()
}

fn plain_error_response(error: &Error) -> Response {
    (crate::error_mapping::status_for(error), Json(json!({"error": error.message()}))).into_response()
}
