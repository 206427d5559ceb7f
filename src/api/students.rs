use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppState, Session};
use crate::error::ApiError;
use crate::models::StudentSummary;
use crate::policy::{Action, Target};
use crate::schema::{self, INDIVIDUAL_RECORD_FORM};

/// `[{"sr_code": ...}]` for every record form, newest code first.
pub(super) async fn directory(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<Value>>, ApiError> {
    session.authorize(Action::List, Target::StudentDirectory)?;
    let forms = schema::lookup(INDIVIDUAL_RECORD_FORM)
        .ok_or_else(|| ApiError::Internal("individual record form is not registered".to_string()))?;

    let codes = state
        .store
        .list_records(forms)
        .await?
        .iter()
        .filter_map(|record| record.text("sr_code").map(|code| json!({ "sr_code": code })))
        .collect();
    Ok(Json(codes))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct SearchQuery {
    query: Option<String>,
}

pub(super) async fn search(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    session.authorize(Action::List, Target::StudentSearch)?;
    let needle = params.query.as_deref().map(str::trim).unwrap_or_default();
    if needle.is_empty() {
        return Ok(Json(json!({ "results": [] })));
    }

    let results: Vec<StudentSummary> = state
        .store
        .search_students(needle)
        .await?
        .iter()
        .filter_map(StudentSummary::from_record)
        .collect();
    Ok(Json(json!({ "results": results })))
}
