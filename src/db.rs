use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::analytics::{
    CategoryCount, DateRange, InterviewFilter, ProblemField, ProblemSummary, ProblemTrends,
};
use crate::auth;
use crate::models::{
    Account, Appointment, AppointmentScope, NewAccount, NewAppointment, Profile, Record, Role,
};
use crate::schema::{self, ListOrder, RecordSchema, INDIVIDUAL_RECORD_FORM, ROUTINE_INTERVIEW};
use crate::store::{Store, StoreError};

const RECORD_COLUMNS: &str = "id, kind, owner_id, data, created_at, updated_at";
const APPOINTMENT_COLUMNS: &str = "a.id, a.record_id, COALESCE(r.data->>'sr_code', '') AS sr_code, \
     a.counselor_id, a.scheduled_date, a.scheduled_time, a.reason, a.created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn order_clause(order: ListOrder) -> String {
    match order {
        ListOrder::IdAscending => "id ASC".to_string(),
        ListOrder::IdDescending => "id DESC".to_string(),
        ListOrder::FieldDescending(field) => format!("data->>'{field}' DESC, id DESC"),
        ListOrder::CreatedThenModifiedDescending => {
            "created_at DESC, updated_at DESC, id DESC".to_string()
        }
    }
}

fn unique_violation(err: sqlx::Error, schema: &RecordSchema) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let field = schema.unique.first().copied().unwrap_or("id");
            return StoreError::Duplicate(field.to_string());
        }
    }
    StoreError::Database(err)
}

/// Escapes `%`, `_` and `\` so user input matches literally inside ILIKE.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn record_from_row(row: &PgRow) -> Result<Record, StoreError> {
    let Json(fields): Json<Map<String, Value>> = row.try_get("data")?;
    Ok(Record {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        owner: row.try_get("owner_id")?,
        fields,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<Profile, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(Profile {
        id: row.try_get("profile_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        role: role
            .parse::<Role>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?,
    })
}

fn appointment_from_row(row: &PgRow) -> Result<Appointment, StoreError> {
    Ok(Appointment {
        id: row.try_get("id")?,
        student: row.try_get("record_id")?,
        sr_code: row.try_get("sr_code")?,
        counselor: row.try_get("counselor_id")?,
        date: row.try_get("scheduled_date")?,
        time: row.try_get("scheduled_time")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Stored interview dates are `YYYY-MM-DD` text, so bounds compare as text.
fn date_bound(bound: Option<NaiveDate>) -> Option<String> {
    bound.map(|date| date.format("%Y-%m-%d").to_string())
}

const INTERVIEW_RANGE: &str = "($2::text IS NULL OR data->>'date' >= $2) \
     AND ($3::text IS NULL OR data->>'date' <= $3)";

fn tally(row: &PgRow, column: &str) -> Result<usize, StoreError> {
    let count: i64 = row.try_get(column)?;
    usize::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count in `{column}`")))
}

/// One `COUNT(*) FILTER` column per problem field, named after the field.
fn per_field_counts(condition: impl Fn(&str) -> String) -> String {
    ProblemField::ALL
        .iter()
        .map(|field| {
            let column = field.column();
            format!("COUNT(*) FILTER (WHERE {}) AS {column}", condition(column))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, account: NewAccount) -> Result<Option<Profile>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO guidance.users (username, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (username) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&account.username)
        .bind(&account.password_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            return Ok(None);
        };

        let profile_id: i64 = sqlx::query_scalar(
            "INSERT INTO guidance.profiles (user_id, role) VALUES ($1, $2) RETURNING id",
        )
        .bind(user_id)
        .bind(account.role.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Profile {
            id: profile_id,
            user_id,
            username: account.username,
            role: account.role,
        }))
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT p.id AS profile_id, u.id AS user_id, u.username, p.role, u.password_hash
            FROM guidance.users u
            JOIN guidance.profiles p ON p.user_id = u.id
            WHERE u.username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Account, StoreError> {
            Ok(Account {
                profile: profile_from_row(&row)?,
                password_hash: row.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    async fn insert_token(&self, token_hash: &str, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guidance.auth_tokens (token_hash, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET token_hash = EXCLUDED.token_hash, created_at = now()
            "#,
        )
        .bind(token_hash)
        .bind(profile.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn profile_by_token(&self, token_hash: &str) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT p.id AS profile_id, u.id AS user_id, u.username, p.role
            FROM guidance.auth_tokens t
            JOIN guidance.users u ON u.id = t.user_id
            JOIN guidance.profiles p ON p.user_id = u.id
            WHERE t.token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    async fn list_records(&self, schema: &RecordSchema) -> Result<Vec<Record>, StoreError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM guidance.records WHERE kind = $1 ORDER BY {}",
            order_clause(schema.order)
        );
        let rows = sqlx::query(&query)
            .bind(schema.name)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn insert_record(
        &self,
        schema: &RecordSchema,
        fields: Map<String, Value>,
        owner: Option<i64>,
    ) -> Result<Record, StoreError> {
        let query = format!(
            "INSERT INTO guidance.records (kind, owner_id, data) VALUES ($1, $2, $3) RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(schema.name)
            .bind(owner)
            .bind(Json(&fields))
            .fetch_one(&self.pool)
            .await
            .map_err(|err| unique_violation(err, schema))?;

        record_from_row(&row)
    }

    async fn fetch_record(&self, schema: &RecordSchema, id: i64) -> Result<Option<Record>, StoreError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM guidance.records WHERE kind = $1 AND id = $2");
        let row = sqlx::query(&query)
            .bind(schema.name)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_record(
        &self,
        schema: &RecordSchema,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM guidance.records WHERE kind = $1 AND data -> $2 = $3 ORDER BY id LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(schema.name)
            .bind(field)
            .bind(Json(value))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn replace_record(
        &self,
        schema: &RecordSchema,
        id: i64,
        fields: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError> {
        let query = format!(
            r#"
            UPDATE guidance.records
            SET data = $3, updated_at = now()
            WHERE kind = $1 AND id = $2
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(schema.name)
            .bind(id)
            .bind(Json(&fields))
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| unique_violation(err, schema))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete_record(&self, schema: &RecordSchema, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM guidance.records WHERE kind = $1 AND id = $2")
            .bind(schema.name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search_students(&self, query: &str) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM guidance.records
            WHERE kind = $1
              AND (data->>'sr_code' ILIKE $2
                   OR data->>'firstname' ILIKE $2
                   OR data->>'lastname' ILIKE $2)
            ORDER BY data->>'sr_code' DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(INDIVIDUAL_RECORD_FORM)
            .bind(like_pattern(query))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count_problem_values(
        &self,
        filter: &InterviewFilter,
        field: ProblemField,
    ) -> Result<Vec<CategoryCount>, StoreError> {
        let column = field.column();
        let query = format!(
            r#"
            SELECT (data->>'{column}')::boolean AS value, COUNT(*) AS count
            FROM guidance.records
            WHERE kind = $1
              AND jsonb_typeof(data->'{column}') = 'boolean'
              AND {INTERVIEW_RANGE}
              AND ($4::text IS NULL OR data->>'grade' = $4)
            GROUP BY 1
            ORDER BY 1
            "#
        );
        let rows = sqlx::query(&query)
            .bind(ROUTINE_INTERVIEW)
            .bind(date_bound(filter.range.start))
            .bind(date_bound(filter.range.end))
            .bind(filter.grade.as_deref())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<CategoryCount, StoreError> {
                Ok(CategoryCount {
                    field,
                    value: row.try_get("value")?,
                    count: tally(row, "count")?,
                })
            })
            .collect()
    }

    async fn summarize_problems(&self, range: DateRange) -> Result<ProblemSummary, StoreError> {
        let counts = per_field_counts(|column| format!("jsonb_typeof(data->'{column}') = 'boolean'"));
        let query = format!(
            "SELECT {counts} FROM guidance.records WHERE kind = $1 AND {INTERVIEW_RANGE}"
        );
        let row = sqlx::query(&query)
            .bind(ROUTINE_INTERVIEW)
            .bind(date_bound(range.start))
            .bind(date_bound(range.end))
            .fetch_one(&self.pool)
            .await?;

        let mut summary = ProblemSummary::default();
        for field in ProblemField::ALL {
            *summary.slot(field) = tally(&row, field.column())?;
        }
        Ok(summary)
    }

    async fn problem_trends(&self) -> Result<ProblemTrends, StoreError> {
        let counts = per_field_counts(|column| format!("data->'{column}' = 'true'::jsonb"));
        let query = format!(
            r#"
            SELECT data->>'grade' AS grade, {counts}
            FROM guidance.records
            WHERE kind = $1 AND data->>'grade' IS NOT NULL
            GROUP BY 1
            "#
        );
        let rows = sqlx::query(&query)
            .bind(ROUTINE_INTERVIEW)
            .fetch_all(&self.pool)
            .await?;

        let mut trends = ProblemTrends::default();
        for row in &rows {
            let grade: String = row.try_get("grade")?;
            for field in ProblemField::ALL {
                trends.add(&grade, field, tally(row, field.column())?);
            }
        }
        Ok(trends)
    }

    async fn list_appointments(&self, scope: AppointmentScope) -> Result<Vec<Appointment>, StoreError> {
        let mut query = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM guidance.appointments a \
             JOIN guidance.records r ON r.id = a.record_id"
        );
        if let AppointmentScope::StudentProfile(_) = scope {
            query.push_str(" WHERE r.owner_id = $1");
        }
        query.push_str(" ORDER BY a.scheduled_date, a.scheduled_time NULLS FIRST, a.id");

        let mut rows = sqlx::query(&query);
        if let AppointmentScope::StudentProfile(profile_id) = scope {
            rows = rows.bind(profile_id);
        }

        let records = rows.fetch_all(&self.pool).await?;
        records.iter().map(appointment_from_row).collect()
    }

    async fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, StoreError> {
        let query = format!(
            r#"
            WITH a AS (
                INSERT INTO guidance.appointments
                (record_id, counselor_id, scheduled_date, scheduled_time, reason)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
            )
            SELECT {APPOINTMENT_COLUMNS}
            FROM a JOIN guidance.records r ON r.id = a.record_id
            "#
        );
        let row = sqlx::query(&query)
            .bind(appointment.student)
            .bind(appointment.counselor)
            .bind(appointment.date)
            .bind(appointment.time)
            .bind(&appointment.reason)
            .fetch_one(&self.pool)
            .await?;

        appointment_from_row(&row)
    }

    async fn fetch_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let query = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM guidance.appointments a \
             JOIN guidance.records r ON r.id = a.record_id WHERE a.id = $1"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(appointment_from_row).transpose()
    }

    async fn delete_appointment(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM guidance.appointments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Creates or reuses an account and returns its profile.
pub async fn ensure_account(
    store: &dyn Store,
    username: &str,
    password: &str,
    role: Role,
) -> anyhow::Result<Profile> {
    let created = store
        .create_account(NewAccount {
            username: username.to_string(),
            password_hash: auth::hash_password(password),
            role,
        })
        .await?;

    match created {
        Some(profile) => Ok(profile),
        None => {
            let existing = store
                .find_account(username)
                .await?
                .with_context(|| format!("account {username} vanished during seeding"))?;
            Ok(existing.profile)
        }
    }
}

pub async fn seed(store: &dyn Store) -> anyhow::Result<()> {
    let counselor = ensure_account(store, "counselor.reyes", "counselor-demo", Role::Counselor).await?;
    let student = ensure_account(store, "student.santos", "student-demo", Role::Student).await?;

    let forms = schema::lookup(INDIVIDUAL_RECORD_FORM).context("record form schema missing")?;
    let students = vec![
        ("21-00412", "Maria", "Santos", "Grade 7", "Sampaguita", student.id),
        ("21-00587", "Jose", "Dela Cruz", "Grade 7", "Sampaguita", counselor.id),
        ("20-01133", "Ana", "Reyes", "Grade 8", "Narra", counselor.id),
    ];

    for (sr_code, firstname, lastname, year, section, owner) in students {
        let fields = json!({
            "sr_code": sr_code,
            "firstname": firstname,
            "lastname": lastname,
            "year": year,
            "section": section,
        });
        let clean = forms
            .validate(&fields, false)
            .map_err(|errors| anyhow::anyhow!("seed record {sr_code} invalid: {errors:?}"))?;
        match store.insert_record(forms, clean, Some(owner)).await {
            Ok(_) | Err(StoreError::Duplicate(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }

    let interviews = schema::lookup(ROUTINE_INTERVIEW).context("interview schema missing")?;
    if store.list_records(interviews).await?.is_empty() {
        let seeded = vec![
            ("Maria Santos", "Grade 7", "2024-08-19", true, false, false, true, false),
            ("Jose Dela Cruz", "Grade 7", "2024-09-02", false, true, false, true, false),
            ("Ana Reyes", "Grade 8", "2024-09-16", false, false, true, false, true),
        ];
        for (name, grade, date, family, friends, health, academic, career) in seeded {
            let fields = json!({
                "name": name,
                "grade": grade,
                "date": date,
                "family_problem": family,
                "friends_problem": friends,
                "health_problem": health,
                "academic_problem": academic,
                "career_problem": career,
            });
            let clean = interviews
                .validate(&fields, false)
                .map_err(|errors| anyhow::anyhow!("seed interview invalid: {errors:?}"))?;
            store.insert_record(interviews, clean, None).await?;
        }

        let maria = store
            .find_record(forms, "sr_code", &json!("21-00412"))
            .await?
            .context("seeded record form 21-00412 missing")?;
        store
            .insert_appointment(NewAppointment {
                student: maria.id,
                counselor: counselor.id,
                date: NaiveDate::from_ymd_opt(2024, 11, 25).context("invalid date")?,
                time: None,
                reason: Some("Follow-up on routine interview".to_string()),
            })
            .await?;
    }

    info!("seed data ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("21-00"), "%21-00%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn order_clauses_match_collection_orders() {
        assert_eq!(order_clause(ListOrder::IdAscending), "id ASC");
        assert_eq!(
            order_clause(ListOrder::FieldDescending("sr_code")),
            "data->>'sr_code' DESC, id DESC"
        );
    }

    #[test]
    fn interview_bounds_compare_as_stored_date_text() {
        assert_eq!(date_bound(NaiveDate::from_ymd_opt(2024, 3, 7)), Some("2024-03-07".to_string()));
        assert_eq!(date_bound(None), None);
    }

    #[test]
    fn per_field_counts_name_every_problem_column() {
        let columns = per_field_counts(|column| format!("data->'{column}' = 'true'::jsonb"));
        for field in ProblemField::ALL {
            let column = field.column();
            assert!(columns.contains(&format!(
                "COUNT(*) FILTER (WHERE data->'{column}' = 'true'::jsonb) AS {column}"
            )));
        }
        assert_eq!(columns.matches("COUNT(*)").count(), ProblemField::ALL.len());
    }

    #[tokio::test]
    async fn seeding_twice_does_not_duplicate() {
        let store = MemoryStore::new();
        seed(&store).await.unwrap();
        seed(&store).await.unwrap();

        let forms = schema::lookup(INDIVIDUAL_RECORD_FORM).unwrap();
        let interviews = schema::lookup(ROUTINE_INTERVIEW).unwrap();
        assert_eq!(store.list_records(forms).await.unwrap().len(), 3);
        assert_eq!(store.list_records(interviews).await.unwrap().len(), 3);
        assert_eq!(
            store.list_appointments(AppointmentScope::All).await.unwrap().len(),
            1
        );
    }
}
