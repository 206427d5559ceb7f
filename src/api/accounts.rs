use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{parse_json, AppState};
use crate::auth;
use crate::error::ApiError;
use crate::models::{NewAccount, Role};
use crate::schema::FieldErrors;

const USERNAME_MAX_CHARS: usize = 150;

#[derive(Debug, Default, Deserialize)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
    role: Option<String>,
}

fn credentials(body: &Bytes) -> Result<Credentials, ApiError> {
    let payload = parse_json(body)?;
    serde_json::from_value(payload)
        .map_err(|err| ApiError::BadRequest(format!("Invalid credentials payload: {err}")))
}

pub(super) async fn register(State(state): State<AppState>, body: Bytes) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = credentials(&body)?;

    let role = request
        .role
        .as_deref()
        .and_then(|raw| raw.parse::<Role>().ok())
        .filter(|role| Role::SELF_SERVICE.contains(role))
        .ok_or_else(|| ApiError::Rejected("Invalid role specified".to_string()))?;

    let mut errors = FieldErrors::default();
    let username = request.username.as_deref().map(str::trim).unwrap_or_default();
    match request.username.as_deref() {
        None => errors.add("username", "This field is required."),
        Some(_) if username.is_empty() => errors.add("username", "This field may not be blank."),
        Some(_) if username.chars().count() > USERNAME_MAX_CHARS => errors.add(
            "username",
            format!("Ensure this field has no more than {USERNAME_MAX_CHARS} characters."),
        ),
        Some(_) if !is_valid_username(username) => errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        ),
        Some(_) => {}
    }
    let password = match request.password {
        None => {
            errors.add("password", "This field is required.");
            String::new()
        }
        Some(password) if password.is_empty() => {
            errors.add("password", "This field may not be blank.");
            password
        }
        Some(password) => password,
    };
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password_hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let account = NewAccount {
        username: username.to_string(),
        password_hash,
        role,
    };
    let Some(profile) = state.store.create_account(account).await? else {
        return Err(ApiError::Rejected("User already exists".to_string()));
    };

    info!(username = %profile.username, role = %profile.role, "account registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User created successfully",
            "username": profile.username,
            "role": profile.role,
        })),
    ))
}

pub(super) async fn login(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let request = credentials(&body)?;
    let invalid = || ApiError::BadRequest("Invalid credentials".to_string());

    let (Some(username), Some(password)) = (request.username, request.password) else {
        return Err(invalid());
    };
    let Some(account) = state.store.find_account(username.trim()).await? else {
        warn!(%username, "login for unknown account");
        return Err(invalid());
    };

    let encoded = account.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &encoded))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    if !verified {
        warn!(%username, "login with wrong password");
        return Err(invalid());
    }

    let token = auth::generate_token();
    state
        .store
        .insert_token(&auth::hash_token(&token), &account.profile)
        .await?;
    info!(username = %account.profile.username, "login succeeded");

    Ok(Json(json!({ "token": token, "role": account.profile.role })))
}

fn is_valid_username(username: &str) -> bool {
    username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '+' | '-'))
}
