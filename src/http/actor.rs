use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::engine::authz::Actor;
use crate::error::EngineError;

/// Extracts the caller identity from `x-actor-id` / `x-actor-role` headers.
/// Real token parsing (JWT/session cookie/etc.) is an external collaborator
/// per §1 — this extractor is the seam where it would plug in.
pub struct ActorExtractor(pub Actor);

impl<S> FromRequestParts<S> for ActorExtractor
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .ok_or(EngineError::Unauthenticated)?
            .to_string();
        let role = parts
            .headers
            .get("x-actor-role")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("viewer")
            .to_string();
        Ok(ActorExtractor(Actor { id, role }))
    }
}
