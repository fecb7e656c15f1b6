//! Caller identity resolution
//!
//! Session issuance lives in an external authentication collaborator; this
//! module only verifies bearer tokens and assembles the per-request
//! [`Caller`] (id, preferred languages, network address). Anonymous
//! requests produce a caller with no id.

use axum::http::header::{ACCEPT_LANGUAGE, AUTHORIZATION};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::model::Caller;

/// User context extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub languages: Vec<String>,
}

/// Claims structure for access tokens
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    languages: Option<Vec<String>>,
    #[allow(dead_code)]
    exp: i64,
    #[allow(dead_code)]
    iat: i64,
}

/// Verify a JWT token and extract user info
pub fn verify_token(token: &str, secret: &str) -> Result<AuthUser, ApiError> {
    let secret = secret.trim();

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_aud = false;

    let token_data = decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT verification failed");
        ApiError::Unauthorized
    })?;

    let user_id = Uuid::parse_str(&token_data.claims.sub).map_err(|e| {
        tracing::debug!(error = %e, "token subject is not a valid id");
        ApiError::Unauthorized
    })?;

    Ok(AuthUser {
        user_id,
        languages: token_data.claims.languages.unwrap_or_default(),
    })
}

/// Extract bearer token from Authorization header
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .filter(|h| h.starts_with("Bearer "))
        .map(|h| h[7..].to_string())
}

/// Preferred languages from Accept-Language, most preferred first.
fn parse_accept_language(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|h| h.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .filter_map(|part| {
                    let tag = part.split(';').next()?.trim();
                    (!tag.is_empty() && tag != "*").then(|| tag.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Assemble the caller for one request. An invalid token downgrades the
/// request to anonymous rather than failing: protected operations reject
/// later with a precise Unauthorized.
pub fn caller_from_headers(headers: &HeaderMap, secret: &str, address: Option<String>) -> Caller {
    let verified = extract_token(headers).and_then(|token| verify_token(&token, secret).ok());
    let mut languages = parse_accept_language(headers);

    match verified {
        Some(user) => {
            if languages.is_empty() {
                languages = user.languages;
            }
            Caller {
                id: Some(user.user_id),
                languages,
                address,
            }
        }
        None => Caller {
            id: None,
            languages,
            address,
        },
    }
}
