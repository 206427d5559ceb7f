//! HTTP surface.
//!
//! Every route sits behind two layers: request tracing (request id, timing,
//! no-cache headers) and caller resolution (token → [`Session`]).

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::{Map, Value};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::analytics::ProblemField;
use crate::auth;
use crate::error::ApiError;
use crate::models::Profile;
use crate::policy::{self, Action, Target};
use crate::schema::SCHEMAS;
use crate::storage::MediaStore;
use crate::store::Store;

mod accounts;
mod analytics;
mod appointments;
mod files;
mod records;
mod students;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub media: MediaStore,
    pub max_upload_bytes: usize,
}

/// Who is calling; inserted by [`resolve_caller`] for every request.
#[derive(Debug, Clone, Default)]
pub struct Session {
    caller: Option<Profile>,
}

impl Session {
    pub fn caller(&self) -> Option<&Profile> {
        self.caller.as_ref()
    }

    pub fn require(&self) -> Result<&Profile, ApiError> {
        self.caller.as_ref().ok_or_else(ApiError::unauthenticated)
    }

    pub fn authorize(&self, action: Action, target: Target<'_>) -> Result<(), ApiError> {
        policy::authorize(self.caller(), action, target).map_err(ApiError::from)
    }
}

pub fn router(state: AppState) -> Router {
    let mut api = Router::new()
        .route("/login/", post(accounts::login))
        .route("/register/", post(accounts::register))
        .route("/students/", get(students::directory))
        .route("/api/students/", get(students::directory))
        .route("/api/search-student/", get(students::search))
        .route(
            "/api/appointment/",
            get(appointments::list).post(appointments::create),
        )
        .route("/api/appointment/:id/", delete(appointments::destroy))
        .route("/api/routineinterview_analytics/", get(analytics::summary))
        .route("/api/problem_trends/", get(analytics::trends))
        .route("/api/storage/files/", get(files::list))
        .route("/api/storage/download/:filename/", get(files::download));

    for field in ProblemField::ALL {
        api = api.route(&format!("/api/{}_analytics/", field.slug()), analytics::route(field));
    }

    for schema in SCHEMAS {
        api = api.merge(records::routes(schema));
    }

    let uploads = Router::new()
        .route("/api/upload/", post(files::upload))
        .route("/api/storage/upload/", post(files::storage_upload))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes));

    api.merge(uploads)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_caller))
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

async fn resolve_caller(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let key = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(auth::parse_authorization)
        .map(str::to_string);

    let caller = match key {
        None => None,
        Some(key) => match state.store.profile_by_token(&auth::hash_token(&key)).await {
            Ok(Some(profile)) => Some(profile),
            Ok(None) => return ApiError::Unauthorized("Invalid token.".to_string()).into_response(),
            Err(err) => return ApiError::from(err).into_response(),
        },
    };

    request.extensions_mut().insert(Session { caller });
    next.run(request).await
}

async fn trace_request(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %request.method(),
        route = %request.uri().path(),
    );

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
    });

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert("x-request-id", value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("max-age=0, no-cache, no-store, must-revalidate, private"),
    );
    response
}

/// An empty body reads as an empty object so missing fields are reported per field.
pub(crate) fn parse_json(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(format!("JSON parse error - {err}")))
}

pub(crate) fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::memory::MemoryStore;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    pub struct TestApp {
        pub router: Router,
        pub store: Arc<MemoryStore>,
        pub _media_dir: tempfile::TempDir,
    }

    impl TestApp {
        pub fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let media_dir = tempfile::tempdir().unwrap();
            let state = AppState {
                store: store.clone(),
                media: MediaStore::new(media_dir.path(), "/media/"),
                max_upload_bytes: 1024 * 1024,
            };
            Self {
                router: router(state),
                store,
                _media_dir: media_dir,
            }
        }

        pub async fn send(&self, request: axum::http::Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                })
            };
            (status, body)
        }

        pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = axum::http::Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("Authorization", format!("Token {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.send(request).await
        }

        /// Registers and logs in, returning the token.
        pub async fn login_as(&self, username: &str, role: &str) -> String {
            let credentials = serde_json::json!({
                "username": username,
                "password": "correct-horse",
                "role": role,
            });
            let (status, _) = self.call(Method::POST, "/register/", None, Some(credentials.clone())).await;
            assert_eq!(status, StatusCode::CREATED);
            let (status, body) = self.call(Method::POST, "/login/", None, Some(credentials)).await;
            assert_eq!(status, StatusCode::OK);
            body["token"].as_str().unwrap().to_string()
        }
    }
}
