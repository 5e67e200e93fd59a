use crate::auth as auth_service;
use crate::state;

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Serialize)]
struct AuthErrorResponse {
    error: &'static str,
}

/// Lets a request through only with valid basic-auth credentials. The
/// authenticated principal is attached as a request extension.
pub(crate) async fn require_admin(
    State(state): State<state::AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let credentials = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(auth_service::parse_basic);
    let principal = match credentials {
        Some((username, password)) => {
            // Argon2 runs on the blocking pool.
            let verifier = Arc::clone(&state.verifier);
            tokio::task::spawn_blocking(move || verifier.verify(&username, &password))
                .await
                .unwrap_or_else(|err| {
                    tracing::error!(error = %err, "credential check failed");
                    None
                })
        }
        None => None,
    };

    match principal {
        Some(principal) => {
            tracing::debug!(user = %principal.0, path = %req.uri().path(), "admin request");
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "rejected admin request");
            let mut response = (
                StatusCode::UNAUTHORIZED,
                Json(AuthErrorResponse {
                    error: "unauthorized",
                }),
            )
                .into_response();
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"pushcast\""),
            );
            response
        }
    }
}
