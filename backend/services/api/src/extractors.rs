use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use relay_common::error::RelayError;
use relay_sync::Caller;
use uuid::Uuid;

use crate::error::ApiError;

/// The calling user, from the `X-Org-Id` and `X-User-Id` headers.
pub struct CallerContext(pub Caller);

fn uuid_header(parts: &Parts, name: &str) -> Result<Uuid, ApiError> {
    let header = parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError(RelayError::Validation(format!("missing {name} header"))))?;

    let value = header
        .to_str()
        .map_err(|_| ApiError(RelayError::Validation(format!("invalid {name} header value"))))?;

    Uuid::parse_str(value)
        .map_err(|_| ApiError(RelayError::Validation(format!("invalid UUID in {name}: {value}"))))
}

impl<S: Send + Sync> FromRequestParts<S> for CallerContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let org_id = uuid_header(parts, "X-Org-Id")?;
        let user_id = uuid_header(parts, "X-User-Id")?;
        Ok(CallerContext(Caller::user(org_id, user_id)))
    }
}
