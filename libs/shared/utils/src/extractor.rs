use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use shared_models::auth::{Actor, User};
use shared_models::error::AppError;

use crate::jwt::validate_token;
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AppError> {
    let Some(auth_header) = headers.get("Authorization") else {
        return Ok(None);
    };

    let auth_value = auth_header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    auth_value
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

/// Rejects requests without a valid bearer token and stores the user in the
/// request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())?
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let user = validate_token(token, &state.config.supabase_jwt_secret).map_err(AppError::Auth)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Resolves the caller of a route that also serves anonymous guests.
/// A present but invalid token is still an error.
pub fn actor_from_token(state: &AppState, token: Option<&str>) -> Result<Actor, AppError> {
    match token {
        Some(token) => {
            let user = validate_token(token, &state.config.supabase_jwt_secret).map_err(AppError::Auth)?;
            Ok(Actor::from_user(&user))
        }
        None => Ok(Actor::Guest),
    }
}

pub async fn extract_user<B>(request: &Request<B>) -> Result<User, AppError> {
    request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| AppError::Auth("User not found in request extensions".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{JwtTestUtils, TestConfig, TestUser};
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    #[test]
    fn missing_token_resolves_to_guest() {
        let state = AppState::in_memory(TestConfig::default().to_app_config());
        assert_eq!(actor_from_token(&state, None).unwrap(), Actor::Guest);
    }

    #[test]
    fn invalid_token_is_rejected_even_on_guest_routes() {
        let state = AppState::in_memory(TestConfig::default().to_app_config());
        assert_matches!(
            actor_from_token(&state, Some("invalid.token.format")),
            Err(AppError::Auth(_))
        );
    }

    #[test]
    fn valid_token_resolves_actor() {
        let config = TestConfig::default();
        let state = AppState::in_memory(config.to_app_config());
        let user = TestUser::client("client@example.com");
        let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));
        assert_eq!(
            actor_from_token(&state, Some(&token)).unwrap(),
            Actor::Client { user_id: user.id.clone() }
        );
    }

    #[test]
    fn non_bearer_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert_matches!(bearer_token(&headers), Err(AppError::Auth(_)));
        assert_matches!(bearer_token(&HeaderMap::new()), Ok(None));
    }
}
