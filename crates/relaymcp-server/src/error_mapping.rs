//! Error taxonomy → HTTP status / OAuth error code mapping (spec §7
//! "User-visible failure behavior"): keeps `/token` and `/authorize` failures
//! shaped as spec-correct OAuth error bodies instead of generic 500s.

use axum::http::StatusCode;
use relaymcp_core::{Error, ErrorCategory};
use serde::Serialize;

/// RFC 6749 §5.2 error response body.
#[derive(Debug, Serialize)]
pub struct OAuthErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

/// Maps an error's category to the `(status, oauth_error_code)` pair used by
/// the OAuth endpoints. Categories with no natural OAuth error code fall back
/// to `invalid_request` / `server_error` so the response is still spec-shaped.
pub fn oauth_error_response(error: &Error) -> (StatusCode, OAuthErrorBody) {
    let (status, code) = match error.category() {
        ErrorCategory::Validation => (StatusCode::BAD_REQUEST, "invalid_request"),
        ErrorCategory::Authentication => (StatusCode::UNAUTHORIZED, "invalid_client"),
        ErrorCategory::Authorization => (StatusCode::FORBIDDEN, "access_denied"),
        ErrorCategory::NotFound => (StatusCode::BAD_REQUEST, "invalid_grant"),
        ErrorCategory::Conflict => (StatusCode::CONFLICT, "invalid_request"),
        ErrorCategory::RateLimit => (StatusCode::TOO_MANY_REQUESTS, "slow_down"),
        ErrorCategory::ExternalApi | ErrorCategory::Network | ErrorCategory::Timeout => {
            (StatusCode::BAD_GATEWAY, "temporarily_unavailable")
        }
        ErrorCategory::Storage | ErrorCategory::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        ErrorCategory::Transport => (StatusCode::BAD_REQUEST, "invalid_request"),
        ErrorCategory::Workflow => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        ErrorCategory::Configuration => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
    };
    (
        status,
        OAuthErrorBody {
            error: code,
            error_description: error.message().to_string(),
        },
    )
}

/// Maps an error's category to a plain HTTP status for non-OAuth endpoints
/// (the MCP message endpoint, registration, revocation).
pub fn status_for(error: &Error) -> StatusCode {
    match error.category() {
        ErrorCategory::Validation | ErrorCategory::Transport => StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::ExternalApi | ErrorCategory::Network => StatusCode::BAD_GATEWAY,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Storage | ErrorCategory::Internal | ErrorCategory::Workflow | ErrorCategory::Configuration => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_maps_to_invalid_request() {
        let error = Error::validation("bad redirect_uri");
        let (status, body) = oauth_error_response(&error);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "invalid_request");
    }

    #[test]
    fn not_found_maps_to_invalid_grant_for_oauth() {
        let error = Error::not_found("Invalid or expired authorization code");
        let (_, body) = oauth_error_response(&error);
        assert_eq!(body.error, "invalid_grant");
    }

    #[test]
    fn authentication_error_maps_to_unauthorized_status() {
        let error = Error::authentication("invalid or expired access token");
        assert_eq!(status_for(&error), StatusCode::UNAUTHORIZED);
    }
}
