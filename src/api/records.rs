//! CRUD handlers shared by every form collection.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::Value;
use tracing::info;

use super::{parse_id, parse_json, AppState, Session};
use crate::error::ApiError;
use crate::policy::{Action, Target};
use crate::schema::RecordSchema;

pub(super) fn routes(schema: &'static RecordSchema) -> Router<AppState> {
    Router::new()
        .route(
            &format!("/api/{}/", schema.name),
            get(move |State(state): State<AppState>, Extension(session): Extension<Session>| {
                list(schema, state, session)
            })
            .post(
                move |State(state): State<AppState>, Extension(session): Extension<Session>, body: Bytes| {
                    create(schema, state, session, body)
                },
            ),
        )
        .route(
            &format!("/api/{}/:id/", schema.name),
            get(
                move |State(state): State<AppState>,
                      Extension(session): Extension<Session>,
                      Path(id): Path<String>| retrieve(schema, state, session, id),
            )
            .put(
                move |State(state): State<AppState>,
                      Extension(session): Extension<Session>,
                      Path(id): Path<String>,
                      body: Bytes| update(schema, state, session, id, body, false),
            )
            .patch(
                move |State(state): State<AppState>,
                      Extension(session): Extension<Session>,
                      Path(id): Path<String>,
                      body: Bytes| update(schema, state, session, id, body, true),
            )
            .delete(
                move |State(state): State<AppState>,
                      Extension(session): Extension<Session>,
                      Path(id): Path<String>| destroy(schema, state, session, id),
            ),
        )
}

async fn list(schema: &'static RecordSchema, state: AppState, session: Session) -> Result<Json<Vec<Value>>, ApiError> {
    session.authorize(Action::List, Target::Record(schema))?;
    let records = state.store.list_records(schema).await?;
    Ok(Json(records.iter().map(|record| record.represent(schema)).collect()))
}

async fn create(
    schema: &'static RecordSchema,
    state: AppState,
    session: Session,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    session.authorize(Action::Create, Target::Record(schema))?;
    let payload = parse_json(&body)?;
    let fields = schema.validate(&payload, false).map_err(ApiError::Validation)?;

    let owner = schema
        .owner
        .and(session.caller().map(|profile| profile.id));
    let record = state.store.insert_record(schema, fields, owner).await?;
    info!(collection = schema.name, id = record.id, "record created");

    Ok((StatusCode::CREATED, Json(record.represent(schema))))
}

async fn retrieve(schema: &'static RecordSchema, state: AppState, session: Session, id: String) -> Result<Json<Value>, ApiError> {
    session.authorize(Action::Retrieve, Target::Record(schema))?;
    let id = parse_id(&id)?;
    let record = state
        .store
        .fetch_record(schema, id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(record.represent(schema)))
}

/// PUT replaces every field; PATCH merges the supplied ones over the stored row.
async fn update(
    schema: &'static RecordSchema,
    state: AppState,
    session: Session,
    id: String,
    body: Bytes,
    partial: bool,
) -> Result<Json<Value>, ApiError> {
    session.authorize(Action::Update, Target::Record(schema))?;
    let id = parse_id(&id)?;
    let existing = state
        .store
        .fetch_record(schema, id)
        .await?
        .ok_or_else(ApiError::not_found)?;

    let payload = parse_json(&body)?;
    let changes = schema.validate(&payload, partial).map_err(ApiError::Validation)?;
    let fields = if partial {
        let mut merged = existing.fields;
        merged.extend(changes);
        merged
    } else {
        changes
    };

    let record = state
        .store
        .replace_record(schema, id, fields)
        .await?
        .ok_or_else(ApiError::not_found)?;
    info!(collection = schema.name, id, partial, "record updated");
    Ok(Json(record.represent(schema)))
}

async fn destroy(schema: &'static RecordSchema, state: AppState, session: Session, id: String) -> Result<Response, ApiError> {
    session.authorize(Action::Destroy, Target::Record(schema))?;
    let id = parse_id(&id)?;
    if !state.store.delete_record(schema, id).await? {
        return Err(ApiError::not_found());
    }
    info!(collection = schema.name, id, "record deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    fn interview() -> serde_json::Value {
        json!({
            "name": "Avery Lee",
            "grade": "Grade 7",
            "section": "Rizal",
            "date": "2024-11-18",
            "family_problem": true,
            "career_problem": false,
        })
    }

    #[tokio::test]
    async fn created_records_read_back_identically() {
        let app = TestApp::new();
        let (status, created) = app
            .call(Method::POST, "/api/routine_interview/", None, Some(interview()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "Avery Lee");
        assert_eq!(created["friends_problem"], serde_json::Value::Null);

        let uri = format!("/api/routine_interview/{}/", created["id"]);
        let (status, fetched) = app.call(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (_, listed) = app.call(Method::GET, "/api/routine_interview/", None, None).await;
        assert_eq!(listed, json!([created]));
    }

    #[tokio::test]
    async fn invalid_payloads_report_field_errors_and_store_nothing() {
        let app = TestApp::new();
        let (status, body) = app
            .call(Method::POST, "/api/routine_interview/", None, Some(json!({"name": "Avery"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["grade"], json!(["This field is required."]));

        let (_, listed) = app.call(Method::GET, "/api/routine_interview/", None, None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = TestApp::new();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/conferenceform/")
            .header("Content-Type", "application/json")
            .body(axum::body::Body::from("{\"name\": "))
            .unwrap();
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("JSON parse error"));
    }

    #[tokio::test]
    async fn missing_and_non_numeric_ids_are_not_found() {
        let app = TestApp::new();
        for uri in ["/api/routine_interview/99/", "/api/routine_interview/abc/"] {
            let (status, body) = app.call(Method::GET, uri, None, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "Not found.");
        }
        let (status, _) = app.call(Method::DELETE, "/api/routine_interview/99/", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn updates_to_missing_or_non_numeric_ids_are_not_found() {
        let app = TestApp::new();
        for uri in ["/api/routine_interview/99/", "/api/routine_interview/abc/"] {
            let (status, body) = app.call(Method::PUT, uri, None, Some(interview())).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "PUT {uri}");
            assert_eq!(body["error"], "Not found.");

            let (status, body) = app
                .call(Method::PATCH, uri, None, Some(json!({"remarks": "follow up"})))
                .await;
            assert_eq!(status, StatusCode::NOT_FOUND, "PATCH {uri}");
            assert_eq!(body["error"], "Not found.");
        }
        let (_, listed) = app.call(Method::GET, "/api/routine_interview/", None, None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn put_replaces_and_patch_merges() {
        let app = TestApp::new();
        let (_, created) = app
            .call(Method::POST, "/api/routine_interview/", None, Some(interview()))
            .await;
        let uri = format!("/api/routine_interview/{}/", created["id"]);

        let (status, patched) = app
            .call(Method::PATCH, &uri, None, Some(json!({"remarks": "follow up"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["remarks"], "follow up");
        assert_eq!(patched["family_problem"], true);

        let (status, _) = app
            .call(Method::PUT, &uri, None, Some(json!({"remarks": "only remarks"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut replacement = interview();
        replacement["grade"] = json!("Grade 8");
        let (status, replaced) = app.call(Method::PUT, &uri, None, Some(replacement)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replaced["grade"], "Grade 8");
        assert_eq!(replaced["remarks"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let app = TestApp::new();
        let (_, created) = app
            .call(Method::POST, "/api/routine_interview/", None, Some(interview()))
            .await;
        let uri = format!("/api/routine_interview/{}/", created["id"]);

        let (status, _) = app.call(Method::DELETE, &uri, None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn authenticated_collections_reject_anonymous_callers() {
        let app = TestApp::new();
        let (status, _) = app.call(Method::GET, "/api/grade_eleven/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = app.login_as("adviser", "counselor").await;
        let (status, body) = app.call(Method::GET, "/api/grade_eleven/", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn record_forms_bind_the_creating_profile() {
        let app = TestApp::new();
        let form = json!({"sr_code": "21-00412", "firstname": "Maria", "lastname": "Santos"});

        let (status, _) = app
            .call(Method::POST, "/api/individual_record_form/", None, Some(form.clone()))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = app.login_as("maria", "student").await;
        let (status, created) = app
            .call(Method::POST, "/api/individual_record_form/", Some(&token), Some(form.clone()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created["profile"].is_i64());

        let (status, body) = app
            .call(Method::POST, "/api/individual_record_form/", Some(&token), Some(form))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["sr_code"][0].as_str().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn only_staff_publish_resources() {
        let app = TestApp::new();
        let resource = json!({"title": "Study habits", "content": "Plan your week."});

        let student = app.login_as("pupil", "student").await;
        let (status, _) = app
            .call(Method::POST, "/api/resource/", Some(&student), Some(resource.clone()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let counselor = app.login_as("guide", "counselor").await;
        let (status, created) = app
            .call(Method::POST, "/api/resource/", Some(&counselor), Some(resource))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created["author"].is_i64());

        let (status, listed) = app.call(Method::GET, "/api/resource/", Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }
}
