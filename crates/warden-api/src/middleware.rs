use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use warden_types::api::Claims;
use warden_types::models::Role;

use crate::envelope::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer JWT; handlers read the claims from extensions.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::auth_required("missing bearer token"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::auth_required("missing bearer token"))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::auth_required("invalid or expired token")
    })?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

/// Roles are ordered USER < MODERATOR < ADMIN.
pub fn require_role(claims: &Claims, min: Role) -> Result<(), ApiError> {
    if claims.role >= min {
        Ok(())
    } else {
        Err(ApiError::auth_required(format!("{} role required", min.as_str())))
    }
}
