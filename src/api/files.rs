use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::{AppState, Session};
use crate::error::ApiError;
use crate::policy::{Action, Target};
use crate::storage::StorageError;

/// Pulls the named file part out of a multipart body.
async fn file_part(
    multipart: Result<Multipart, MultipartRejection>,
    field_name: &str,
) -> Result<(String, Bytes), ApiError> {
    let no_file = || ApiError::BadRequest(StorageError::Empty.to_string());
    let mut multipart = multipart.map_err(|_| no_file())?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Malformed upload: {err}")))?
    {
        if field.name() != Some(field_name) {
            continue;
        }
        let file_name = field.file_name().unwrap_or(field_name).to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(format!("Malformed upload: {err}")))?;
        return Ok((file_name, bytes));
    }

    Err(no_file())
}

/// `POST /api/upload/`, form part `upload`.
pub(super) async fn upload(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    session.authorize(Action::Create, Target::Storage)?;
    let (name, bytes) = file_part(multipart, "upload").await?;
    let stored = state.media.save(&name, &bytes).await?;
    info!(name = %stored.name, size = bytes.len(), "file uploaded");
    Ok(Json(json!({ "url": stored.url })))
}

/// `POST /api/storage/upload/`, form part `file`. Disk failures report
/// `success: false` instead of an error status.
pub(super) async fn storage_upload(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    session.authorize(Action::Create, Target::Storage)?;
    let (name, bytes) = file_part(multipart, "file").await?;
    match state.media.save(&name, &bytes).await {
        Ok(stored) => {
            info!(name = %stored.name, size = bytes.len(), "file stored");
            Ok(Json(json!({ "success": true, "url": stored.url })))
        }
        Err(StorageError::Io(err)) => {
            warn!(%name, error = %err, "storing upload failed");
            Ok(Json(json!({ "success": false })))
        }
        Err(err) => Err(err.into()),
    }
}

pub(super) async fn list(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Value>, ApiError> {
    session.authorize(Action::List, Target::Storage)?;
    let files = state.media.list().await?;
    Ok(Json(json!({ "files": files })))
}

pub(super) async fn download(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    session.authorize(Action::Retrieve, Target::Storage)?;
    let Some(file) = state.media.open(&filename).await? else {
        return Err(ApiError::NotFound("File not found.".to_string()));
    };

    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.essence_str()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    const BOUNDARY: &str = "guidance-boundary";

    fn multipart(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn executables_are_refused() {
        let app = TestApp::new();
        let (status, body) = app
            .send(multipart("/api/storage/upload/", "file", "setup.exe", b"MZ"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unsupported file type");

        let (_, body) = app.call(Method::GET, "/api/storage/files/", None, None).await;
        assert_eq!(body, json!({"files": []}));
    }

    #[tokio::test]
    async fn uploads_are_listed_and_downloadable() {
        let app = TestApp::new();
        let (status, body) = app
            .send(multipart("/api/storage/upload/", "file", "Career Guide.pdf", b"%PDF-1.4"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "url": "/media/Career_Guide.pdf"}));

        let (status, body) = app
            .send(multipart("/api/upload/", "upload", "grades.xlsx", b"PK"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "/media/grades.xlsx");

        let (_, body) = app.call(Method::GET, "/api/storage/files/", None, None).await;
        assert_eq!(
            body,
            json!({"files": ["/media/Career_Guide.pdf", "/media/grades.xlsx"]})
        );

        let request = Request::builder()
            .uri("/api/storage/download/Career_Guide.pdf/")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/pdf");
        assert!(response.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .starts_with("attachment"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4");
    }

    #[tokio::test]
    async fn missing_file_parts_are_reported() {
        let app = TestApp::new();
        let (status, body) = app
            .send(multipart("/api/storage/upload/", "attachment", "a.pdf", b"x"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file uploaded");

        let (status, body) = app.call(Method::POST, "/api/upload/", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn unknown_downloads_are_not_found() {
        let app = TestApp::new();
        let (status, body) = app
            .call(Method::GET, "/api/storage/download/missing.pdf/", None, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "File not found.");
    }
}
