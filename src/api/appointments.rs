use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{NaiveDate, NaiveTime};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{parse_id, parse_json, AppState, Session};
use crate::error::ApiError;
use crate::models::{Appointment, AppointmentScope, NewAppointment, Role};
use crate::policy::{Action, Target};
use crate::schema::{self, FieldErrors, INDIVIDUAL_RECORD_FORM};

pub(super) async fn list(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    session.authorize(Action::List, Target::Appointment { counselor: None })?;
    let caller = session.require()?;
    let scope = match caller.role {
        Role::Student => AppointmentScope::StudentProfile(caller.id),
        _ => AppointmentScope::All,
    };
    Ok(Json(state.store.list_appointments(scope).await?))
}

pub(super) async fn create(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    body: Bytes,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    session.authorize(Action::Create, Target::Appointment { counselor: None })?;
    let caller = session.require()?;

    let payload = parse_json(&body)?;
    let empty = Map::new();
    let object = payload.as_object().unwrap_or(&empty);

    let sr_code = match object.get("sr_code") {
        Some(Value::String(code)) => code.trim().to_string(),
        Some(Value::Number(code)) => code.to_string(),
        _ => String::new(),
    };
    let irf = schema::lookup(INDIVIDUAL_RECORD_FORM)
        .ok_or_else(|| ApiError::Internal("individual record form is not registered".to_string()))?;
    let student = if sr_code.is_empty() {
        None
    } else {
        state.store.find_record(irf, "sr_code", &Value::String(sr_code)).await?
    };
    let Some(student) = student else {
        return Err(ApiError::BadRequest("Invalid sr_code. No student found.".to_string()));
    };

    let (date, time, reason) = validate_details(object).map_err(ApiError::Validation)?;
    let appointment = state
        .store
        .insert_appointment(NewAppointment {
            student: student.id,
            counselor: caller.id,
            date,
            time,
            reason,
        })
        .await?;
    info!(id = appointment.id, sr_code = %appointment.sr_code, counselor = caller.id, "appointment booked");

    Ok((StatusCode::CREATED, Json(appointment)))
}

pub(super) async fn destroy(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    session.require()?;
    let id = parse_id(&id)?;
    let appointment = state
        .store
        .fetch_appointment(id)
        .await?
        .ok_or_else(ApiError::not_found)?;

    session.authorize(
        Action::Destroy,
        Target::Appointment {
            counselor: Some(appointment.counselor),
        },
    )?;

    if !state.store.delete_appointment(id).await? {
        return Err(ApiError::not_found());
    }
    info!(id, "appointment deleted");
    Ok(Json(json!({ "message": "Appointment deleted successfully." })))
}

fn validate_details(
    object: &Map<String, Value>,
) -> Result<(NaiveDate, Option<NaiveTime>, Option<String>), FieldErrors> {
    let mut errors = FieldErrors::default();

    let date = match object.get("date") {
        None | Some(Value::Null) => {
            errors.add("date", "This field is required.");
            None
        }
        Some(value) => {
            let parsed = value
                .as_str()
                .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok());
            if parsed.is_none() {
                errors.add(
                    "date",
                    "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.",
                );
            }
            parsed
        }
    };

    let time = match object.get("time") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let parsed = value.as_str().and_then(parse_time);
            if parsed.is_none() {
                errors.add(
                    "time",
                    "Time has wrong format. Use one of these formats instead: hh:mm[:ss].",
                );
            }
            parsed
        }
    };

    let reason = match object.get("reason") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Some(_) => {
            errors.add("reason", "Not a valid string.");
            None
        }
    };

    match date {
        Some(date) if errors.is_empty() => Ok((date, time, reason)),
        _ => Err(errors),
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;
    use axum::http::Method;

    async fn with_student(app: &TestApp, owner_token: &str) {
        let (status, _) = app
            .call(
                Method::POST,
                "/api/individual_record_form/",
                Some(owner_token),
                Some(json!({"sr_code": "21-00412", "firstname": "Maria", "lastname": "Santos"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    fn booking() -> Value {
        json!({"sr_code": "21-00412", "date": "2024-11-20", "time": "09:30", "reason": "Career talk"})
    }

    #[tokio::test]
    async fn anonymous_callers_cannot_touch_appointments() {
        let app = TestApp::new();
        let (status, _) = app.call(Method::GET, "/api/appointment/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.call(Method::POST, "/api/appointment/", None, Some(booking())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.call(Method::DELETE, "/api/appointment/1/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_students_cannot_be_booked() {
        let app = TestApp::new();
        let counselor = app.login_as("reyes", "counselor").await;
        let (status, body) = app
            .call(Method::POST, "/api/appointment/", Some(&counselor), Some(booking()))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid sr_code. No student found.");
    }

    #[tokio::test]
    async fn booking_records_the_counselor_and_scopes_student_views() {
        let app = TestApp::new();
        let student = app.login_as("maria", "student").await;
        let other_student = app.login_as("juan", "student").await;
        let counselor = app.login_as("reyes", "counselor").await;
        with_student(&app, &student).await;

        let (status, booked) = app
            .call(Method::POST, "/api/appointment/", Some(&counselor), Some(booking()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(booked["sr_code"], "21-00412");
        assert_eq!(booked["time"], "09:30:00");

        let (_, all) = app.call(Method::GET, "/api/appointment/", Some(&counselor), None).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        let (_, own) = app.call(Method::GET, "/api/appointment/", Some(&student), None).await;
        assert_eq!(own.as_array().unwrap().len(), 1);
        let (_, none) = app.call(Method::GET, "/api/appointment/", Some(&other_student), None).await;
        assert_eq!(none, json!([]));
    }

    #[tokio::test]
    async fn only_the_booking_counselor_or_an_admin_may_delete() {
        let app = TestApp::new();
        let student = app.login_as("maria", "student").await;
        let counselor = app.login_as("reyes", "counselor").await;
        let colleague = app.login_as("cruz", "counselor").await;
        with_student(&app, &student).await;

        let (_, booked) = app
            .call(Method::POST, "/api/appointment/", Some(&counselor), Some(booking()))
            .await;
        let uri = format!("/api/appointment/{}/", booked["id"]);

        let (status, body) = app.call(Method::DELETE, &uri, Some(&colleague), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Permission denied.");

        let (status, body) = app.call(Method::DELETE, &uri, Some(&counselor), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Appointment deleted successfully.");

        let (status, _) = app.call(Method::DELETE, &uri, Some(&counselor), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn appointments_track_edits_and_removal_of_the_record_form() {
        let app = TestApp::new();
        let student = app.login_as("maria", "student").await;
        let counselor = app.login_as("reyes", "counselor").await;
        with_student(&app, &student).await;

        let (_, booked) = app
            .call(Method::POST, "/api/appointment/", Some(&counselor), Some(booking()))
            .await;
        let (_, forms) = app
            .call(Method::GET, "/api/individual_record_form/", Some(&student), None)
            .await;
        let form_uri = format!("/api/individual_record_form/{}/", forms[0]["id"]);
        assert_eq!(booked["student"], forms[0]["id"]);

        let (status, _) = app
            .call(Method::PATCH, &form_uri, Some(&student), Some(json!({"sr_code": "21-99999"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, own) = app.call(Method::GET, "/api/appointment/", Some(&student), None).await;
        assert_eq!(own.as_array().unwrap().len(), 1);
        assert_eq!(own[0]["sr_code"], "21-99999");

        let (status, _) = app.call(Method::DELETE, &form_uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, all) = app.call(Method::GET, "/api/appointment/", Some(&counselor), None).await;
        assert_eq!(all, json!([]));
    }

    #[tokio::test]
    async fn admins_may_delete_any_appointment() {
        let app = TestApp::new();
        let student = app.login_as("maria", "student").await;
        let counselor = app.login_as("reyes", "counselor").await;
        with_student(&app, &student).await;
        crate::db::ensure_account(app.store.as_ref(), "principal", "correct-horse", Role::Admin)
            .await
            .unwrap();
        let (_, body) = app
            .call(
                Method::POST,
                "/login/",
                None,
                Some(json!({"username": "principal", "password": "correct-horse"})),
            )
            .await;
        let admin = body["token"].as_str().unwrap().to_string();

        let (_, booked) = app
            .call(Method::POST, "/api/appointment/", Some(&counselor), Some(booking()))
            .await;
        let uri = format!("/api/appointment/{}/", booked["id"]);

        let (status, _) = app.call(Method::DELETE, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, remaining) = app.call(Method::GET, "/api/appointment/", Some(&counselor), None).await;
        assert_eq!(remaining, json!([]));
    }

    #[test]
    fn details_require_a_valid_date() {
        let object = json!({"time": "25:00", "reason": 4});
        let errors = validate_details(object.as_object().unwrap()).unwrap_err();
        assert_eq!(errors.get("date"), Some(&["This field is required.".to_string()][..]));
        assert!(errors.get("time").is_some());
        assert!(errors.get("reason").is_some());

        let object = json!({"date": "2024-11-20", "time": "14:05:30", "reason": "  "});
        let (date, time, reason) = validate_details(object.as_object().unwrap()).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 11, 20).unwrap());
        assert_eq!(time, NaiveTime::from_hms_opt(14, 5, 30));
        assert_eq!(reason, None);
    }
}
