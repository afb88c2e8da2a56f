//! Client identity extractor.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use magetool_core::batch::normalize_client_id;
use serde::Deserialize;

use crate::error::AppError;

/// Header carrying the browser-generated client identifier.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// The calling client, taken from the `X-Client-ID` header, else the
/// `client_id` query parameter, else `"anonymous"`.
///
/// Scopes job ownership and per-client limits. It is not a credential:
/// anyone can claim any id.
///
/// ```ignore
/// async fn my_handler(client: ClientId) -> AppResult<Json<()>> {
///     tracing::info!(client_id = %client.0, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

#[derive(Debug, Deserialize)]
struct ClientQuery {
    client_id: Option<String>,
}

impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let raw = match from_header {
            Some(id) => id,
            None => Query::<ClientQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.client_id)
                .unwrap_or_default(),
        };

        Ok(ClientId(normalize_client_id(&raw)?))
    }
}

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
