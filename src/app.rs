use crate::error::{NotificationError, StoreError};
use crate::state;

use axum::Json;
use axum::Router;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde::Serialize;

mod auth;
mod push;

pub fn app(state: state::AppState) -> Router {
    let admin = Router::new()
        .route("/services/subscribers", get(push::subscriber_count))
        .route(
            "/services/notifications",
            get(push::list_notifications).post(push::create_notification),
        )
        .route(
            "/services/notifications/{id}",
            delete(push::delete_notification),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    Router::new()
        .route(
            "/services/publicSigningKey",
            get(push::public_signing_key).options(preflight),
        )
        .route(
            "/services/isSubscribed",
            post(push::is_subscribed).options(preflight),
        )
        .route(
            "/services/subscribe",
            post(push::subscribe).options(preflight),
        )
        .route(
            "/services/unsubscribe",
            post(push::unsubscribe).options(preflight),
        )
        .route("/health", get(health))
        .merge(admin)
        .layer(middleware::map_response(cors_headers))
        .with_state(state)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    response
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "store operation failed");
        ApiError::Internal
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::ScheduledInPast => ApiError::BadRequest(err.to_string()),
            NotificationError::NotFound(_) => ApiError::NotFound(err.to_string()),
            NotificationError::Store(err) => err.into(),
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::{HttpDispatcher, TokioTimeProvider};
    use crate::auth::{UsersFile, hash_password};
    use crate::config::PushConfig;
    use crate::push::{PushService, ServerIdentity};
    use crate::store::SqliteStore;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
    use base64::{STANDARD, encode_config};
    use serde_json::Value as JsonValue;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    pub(crate) struct TestApp {
        pub(crate) router: Router,
        pub(crate) state: state::AppState,
        _dir: tempfile::TempDir,
    }

    pub(crate) async fn test_app() -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = Arc::new(ServerIdentity::load_or_generate(dir.path()).expect("identity"));
        let users_path = dir.path().join("users.toml");
        let hash = hash_password("secret").expect("hash");
        std::fs::write(
            &users_path,
            format!("[[users]]\nusername = \"admin\"\npassword = \"{hash}\"\n"),
        )
        .expect("write users");
        let push = PushService::new(
            TokioTimeProvider,
            HttpDispatcher::new(Duration::from_secs(1)).expect("dispatcher"),
            Arc::new(SqliteStore::in_memory().await.expect("store")),
            identity,
            PushConfig::default(),
        );
        let state = state::AppState {
            push,
            verifier: Arc::new(UsersFile::load(&users_path)),
        };
        TestApp {
            router: app(state.clone()),
            state,
            _dir: dir,
        }
    }

    fn basic(user: &str, password: &str) -> String {
        format!(
            "Basic {}",
            encode_config(format!("{user}:{password}"), STANDARD)
        )
    }

    fn admin_request(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, basic("admin", "secret"));
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        request.expect("request")
    }

    fn json_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    const SUBSCRIPTION: &str = r#"{"endpoint":"http://127.0.0.1:9/push/abc","expirationTime":null,"keys":{"p256dh":"BPk","auth":"c2Vj"}}"#;

    async fn body_json(response: Response) -> JsonValue {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json body")
    }

    #[tokio::test]
    async fn app__should_return_ok_on_health_endpoint() {
        // Given
        let app = test_app().await;

        // When
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("request failed");

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(body.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn public_signing_key__should_return_raw_point_with_cors() {
        // Given
        let app = test_app().await;

        // When
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/services/publicSigningKey")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("request failed");

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(body.as_ref(), app.state.push.public_key());
        assert_eq!(body.len(), 65);
    }

    #[tokio::test]
    async fn preflight__should_answer_options_on_public_routes() {
        // Given
        let app = test_app().await;

        // When
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/services/subscribe")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("request failed");

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_HEADERS],
            "content-type"
        );
    }

    #[tokio::test]
    async fn subscribe__should_register_and_unsubscribe_should_remove() {
        // Given
        let app = test_app().await;

        // When
        let subscribed = app
            .router
            .clone()
            .oneshot(json_request("/services/subscribe", SUBSCRIPTION))
            .await
            .expect("subscribe");
        let known = app
            .router
            .clone()
            .oneshot(json_request("/services/isSubscribed", SUBSCRIPTION))
            .await
            .expect("is subscribed");
        let unsubscribed = app
            .router
            .clone()
            .oneshot(json_request("/services/unsubscribe", SUBSCRIPTION))
            .await
            .expect("unsubscribe");
        let forgotten = app
            .router
            .oneshot(json_request("/services/isSubscribed", SUBSCRIPTION))
            .await
            .expect("is subscribed");

        // Then
        assert_eq!(subscribed.status(), StatusCode::CREATED);
        assert_eq!(body_json(known).await, JsonValue::Bool(true));
        assert_eq!(unsubscribed.status(), StatusCode::OK);
        assert_eq!(body_json(forgotten).await, JsonValue::Bool(false));
    }

    #[tokio::test]
    async fn subscribe__should_reject_malformed_subscription() {
        // Given
        let app = test_app().await;

        // When
        let missing_keys = app
            .router
            .clone()
            .oneshot(json_request(
                "/services/subscribe",
                r#"{"endpoint":"https://push.example/abc"}"#,
            ))
            .await
            .expect("subscribe");
        let bad_endpoint = app
            .router
            .oneshot(json_request(
                "/services/subscribe",
                r#"{"endpoint":"nowhere","keys":{"p256dh":"BPk","auth":"c2Vj"}}"#,
            ))
            .await
            .expect("subscribe");

        // Then
        assert_eq!(missing_keys.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad_endpoint.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.state.push.subscriber_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn require_admin__should_challenge_missing_or_wrong_credentials() {
        // Given
        let app = test_app().await;

        // When
        let anonymous = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/services/subscribers")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("request failed");
        let wrong = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/services/subscribers")
                    .header(AUTHORIZATION, basic("admin", "guess"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("request failed");

        // Then
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        assert!(anonymous.headers().contains_key(WWW_AUTHENTICATE));
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(wrong).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn subscriber_count__should_report_subscribers() {
        // Given
        let app = test_app().await;
        app.router
            .clone()
            .oneshot(json_request("/services/subscribe", SUBSCRIPTION))
            .await
            .expect("subscribe");

        // When
        let response = app
            .router
            .oneshot(admin_request("GET", "/services/subscribers", None))
            .await
            .expect("request failed");

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["subscribers"], 1);
    }

    #[tokio::test]
    async fn notifications__should_create_list_and_delete_scheduled() {
        // Given
        let app = test_app().await;
        let body = r#"{"title":"Hello","text":"World","url":"https://example.org","icon":"bell.png","dateTime":"2999-01-01T00:00:00Z"}"#;

        // When
        let created = app
            .router
            .clone()
            .oneshot(admin_request("POST", "/services/notifications", Some(body)))
            .await
            .expect("create");
        let created_status = created.status();
        let created = body_json(created).await;
        let id = created["id"].as_u64().expect("id");
        let listed = app
            .router
            .clone()
            .oneshot(admin_request("GET", "/services/notifications", None))
            .await
            .expect("list");
        let deleted = app
            .router
            .clone()
            .oneshot(admin_request(
                "DELETE",
                &format!("/services/notifications/{id}"),
                None,
            ))
            .await
            .expect("delete");
        let deleted_again = app
            .router
            .oneshot(admin_request(
                "DELETE",
                &format!("/services/notifications/{id}"),
                None,
            ))
            .await
            .expect("delete again");

        // Then
        assert_eq!(created_status, StatusCode::ACCEPTED);
        assert_eq!(created["title"], "Hello");
        assert_eq!(created["state"], "pending");
        let listed = body_json(listed).await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        assert_eq!(listed[0]["remaining"], 0);
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        assert_eq!(deleted_again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications__should_reject_past_or_malformed_input() {
        // Given
        let app = test_app().await;
        let past = r#"{"title":"Late","text":"x","url":"u","icon":"i","dateTime":"2000-01-01T00:00:00Z"}"#;

        // When
        let in_past = app
            .router
            .clone()
            .oneshot(admin_request("POST", "/services/notifications", Some(past)))
            .await
            .expect("create");
        let malformed = app
            .router
            .oneshot(admin_request(
                "POST",
                "/services/notifications",
                Some(r#"{"title":1}"#),
            ))
            .await
            .expect("create");

        // Then
        assert_eq!(in_past.status(), StatusCode::BAD_REQUEST);
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn notifications__should_accept_immediate_without_storing() {
        // Given
        let app = test_app().await;
        let body = r#"{"title":"Now","text":"x","url":"u","icon":"i"}"#;

        // When
        let created = app
            .router
            .clone()
            .oneshot(admin_request("POST", "/services/notifications", Some(body)))
            .await
            .expect("create");

        // Then
        assert_eq!(created.status(), StatusCode::ACCEPTED);
        assert!(app.state.push.notifications().await.expect("list").is_empty());
    }
}
