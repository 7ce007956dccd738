//! Bearer authentication middleware for axum
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/orders", get(list_orders))
//!     .layer(middleware::from_fn_with_state(authenticator, require_bearer::<Users>));
//! ```
//!
//! Handlers read the caller via `Extension<Passport<User>>`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::{OidcUserProvider, ResourceProviderAuthenticator};

/// Reject requests without a valid bearer token
pub async fn require_bearer<P>(
    State(authenticator): State<Arc<ResourceProviderAuthenticator<P>>>,
    mut request: Request<Body>,
    next: Next,
) -> Response
where
    P: OidcUserProvider + 'static,
{
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match authenticator.authenticate(authorization.as_deref()).await {
        Ok(passport) => {
            request.extensions_mut().insert(passport);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), error = %e, "Bearer authentication failed");
            let mut response = e.into_response();
            if response.status() == StatusCode::UNAUTHORIZED {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            response
        }
    }
}
