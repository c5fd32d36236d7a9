use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::{
    Filter, Rejection,
    filters::header::headers_cloned,
    http::{
        HeaderMap,
        header::{self},
    },
};

use crate::error::Error;

pub const JWT_ISSUER: &str = "tubely-access";
const JWT_BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Deserialize, Serialize)]
pub struct Claims {
    pub iss: String,
    /// Id of the user the token was issued to.
    pub sub: String,
    pub exp: usize,
}

/// Warp filter for requests that require a user id provided by a valid JWT in the auth header.
pub fn with_user(
    jwt_secret: Arc<String>,
) -> impl Filter<Extract = (Uuid,), Error = Rejection> + Clone {
    warp::any()
        .map(move || jwt_secret.clone())
        .and(headers_cloned())
        .and_then(require_user_from_auth_header)
}

async fn require_user_from_auth_header(
    jwt_secret: Arc<String>,
    header_map: HeaderMap,
) -> Result<Uuid, Rejection> {
    get_user_from_auth_header(&jwt_secret, &header_map).map_err(warp::reject::custom)
}

/// Validates signature, expiry and issuer of the bearer token and returns its subject.
fn get_user_from_auth_header(jwt_secret: &str, header_map: &HeaderMap) -> Result<Uuid, Error> {
    let auth_header = match header_map.get(header::AUTHORIZATION) {
        Some(h) => std::str::from_utf8(h.as_bytes()).map_err(|_| Error::UtfEncodingError)?,
        None => return Err(Error::MissingAuthHeaderError),
    };

    let jwt_token = auth_header
        .strip_prefix(JWT_BEARER_PREFIX)
        .ok_or(Error::InvalidAuthHeaderError)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[JWT_ISSUER]);
    // fails if expired
    let token_data = decode::<Claims>(
        jwt_token.trim(),
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| Error::InvalidJwtError)?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| Error::InvalidJwtError)
}
