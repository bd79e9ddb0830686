use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

use crate::models::ActorRef;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Caller identity taken from the `x-actor-id` header (an external id).
///
/// Resolution against the actor directory happens inside the engine, once per
/// operation.
#[derive(Debug, Clone)]
pub struct ActorContext(pub ActorRef);

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let external_id = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", ACTOR_HEADER))
            })?;

        tracing::Span::current().record("actor_id", external_id);

        Ok(ActorContext(ActorRef::ByExternalId(external_id.to_string())))
    }
}
