use axum::extract::{Query, State};
use axum::routing::{get, MethodRouter};
use axum::{Extension, Json};
use serde::Deserialize;

use super::{AppState, Session};
use crate::analytics::{
    CategoryCount, DateRange, InterviewFilter, ProblemField, ProblemSummary, ProblemTrends,
    DATE_FORMAT_HINT,
};
use crate::error::ApiError;
use crate::policy::{Action, Target};

#[derive(Debug, Default, Deserialize)]
pub(super) struct AnalyticsQuery {
    grade: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl AnalyticsQuery {
    fn range(&self) -> Result<DateRange, ApiError> {
        DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref())
            .map_err(|_| ApiError::BadRequest(DATE_FORMAT_HINT.to_string()))
    }
}

pub(super) fn route(field: ProblemField) -> MethodRouter<AppState> {
    get(
        move |State(state): State<AppState>,
              Extension(session): Extension<Session>,
              Query(query): Query<AnalyticsQuery>| category_counts(field, state, session, query),
    )
}

async fn category_counts(
    field: ProblemField,
    state: AppState,
    session: Session,
    query: AnalyticsQuery,
) -> Result<Json<Vec<CategoryCount>>, ApiError> {
    session.authorize(Action::List, Target::Analytics)?;
    let range = query.range()?;
    let filter = InterviewFilter {
        grade: query.grade.filter(|grade| !grade.trim().is_empty()),
        range,
    };

    Ok(Json(state.store.count_problem_values(&filter, field).await?))
}

pub(super) async fn summary(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ProblemSummary>, ApiError> {
    session.authorize(Action::List, Target::Analytics)?;
    let range = query.range()?;
    Ok(Json(state.store.summarize_problems(range).await?))
}

pub(super) async fn trends(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<ProblemTrends>, ApiError> {
    session.authorize(Action::List, Target::Analytics)?;
    Ok(Json(state.store.problem_trends().await?))
}
