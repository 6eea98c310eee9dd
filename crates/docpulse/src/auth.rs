//! Authenticated principal extraction
//!
//! Token issuance and verification live at the edge, outside this
//! platform. By the time a request arrives here the bearer value is a
//! verified, opaque principal id; the core only uses it for ownership
//! checks and never inspects its structure.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::error::Error;

/// Opaque authenticated principal.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(Error::Unauthorized)?;

        let principal = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(Error::Unauthorized)?;

        Ok(AuthenticatedUser(principal.to_string()))
    }
}
