use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::analytics::{
    self, CategoryCount, DateRange, InterviewFilter, ProblemField, ProblemSummary, ProblemTrends,
};
use crate::models::{
    Account, Appointment, AppointmentScope, NewAccount, NewAppointment, Profile, Record,
};
use crate::schema::{RecordSchema, INDIVIDUAL_RECORD_FORM, ROUTINE_INTERVIEW};
use crate::store::{Store, StoreError};

/// Appointment as stored: the student is referenced by record id.
#[derive(Clone)]
struct AppointmentRow {
    id: i64,
    student: i64,
    counselor: i64,
    date: NaiveDate,
    time: Option<NaiveTime>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    accounts: Vec<Account>,
    /// Token digest → profile id; at most one entry per profile.
    tokens: HashMap<String, i64>,
    records: Vec<Record>,
    appointments: Vec<AppointmentRow>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn hydrate(&self, row: &AppointmentRow) -> Option<Appointment> {
        let form = self.records.iter().find(|record| record.id == row.student)?;
        Some(Appointment {
            id: row.id,
            student: row.student,
            sr_code: form.text("sr_code").unwrap_or_default().to_string(),
            counselor: row.counselor,
            date: row.date,
            time: row.time,
            reason: row.reason.clone(),
            created_at: row.created_at,
        })
    }

    fn interviews(&self) -> Vec<Record> {
        self.records
            .iter()
            .filter(|record| record.kind == ROUTINE_INTERVIEW)
            .cloned()
            .collect()
    }

    fn violates_unique(&self, schema: &RecordSchema, fields: &Map<String, Value>, skip: Option<i64>) -> Option<&'static str> {
        schema.unique.iter().copied().find(|field| {
            let Some(value) = fields.get(*field).filter(|value| !value.is_null()) else {
                return false;
            };
            self.records.iter().any(|record| {
                record.kind == schema.name
                    && Some(record.id) != skip
                    && record.fields.get(*field) == Some(value)
            })
        })
    }
}

/// Process-local store for tests and `serve --in-memory`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<Option<Profile>, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables
            .accounts
            .iter()
            .any(|existing| existing.profile.username == account.username)
        {
            return Ok(None);
        }

        let user_id = tables.next_id();
        let profile = Profile {
            id: tables.next_id(),
            user_id,
            username: account.username,
            role: account.role,
        };
        tables.accounts.push(Account {
            profile: profile.clone(),
            password_hash: account.password_hash,
        });
        Ok(Some(profile))
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .iter()
            .find(|account| account.profile.username == username)
            .cloned())
    }

    async fn insert_token(&self, token_hash: &str, profile: &Profile) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.tokens.retain(|_, owner| *owner != profile.id);
        tables.tokens.insert(token_hash.to_string(), profile.id);
        Ok(())
    }

    async fn profile_by_token(&self, token_hash: &str) -> Result<Option<Profile>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(profile_id) = tables.tokens.get(token_hash) else {
            return Ok(None);
        };
        Ok(tables
            .accounts
            .iter()
            .find(|account| account.profile.id == *profile_id)
            .map(|account| account.profile.clone()))
    }

    async fn list_records(&self, schema: &RecordSchema) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.lock().await;
        let mut records: Vec<Record> = tables
            .records
            .iter()
            .filter(|record| record.kind == schema.name)
            .cloned()
            .collect();
        schema.sort(&mut records);
        Ok(records)
    }

    async fn insert_record(
        &self,
        schema: &RecordSchema,
        fields: Map<String, Value>,
        owner: Option<i64>,
    ) -> Result<Record, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(field) = tables.violates_unique(schema, &fields, None) {
            return Err(StoreError::Duplicate(field.to_string()));
        }

        let now = Utc::now();
        let record = Record {
            id: tables.next_id(),
            kind: schema.name.to_string(),
            owner,
            fields,
            created_at: now,
            updated_at: now,
        };
        tables.records.push(record.clone());
        Ok(record)
    }

    async fn fetch_record(&self, schema: &RecordSchema, id: i64) -> Result<Option<Record>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .records
            .iter()
            .find(|record| record.kind == schema.name && record.id == id)
            .cloned())
    }

    async fn find_record(
        &self,
        schema: &RecordSchema,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .records
            .iter()
            .find(|record| record.kind == schema.name && record.fields.get(field) == Some(value))
            .cloned())
    }

    async fn replace_record(
        &self,
        schema: &RecordSchema,
        id: i64,
        fields: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(field) = tables.violates_unique(schema, &fields, Some(id)) {
            return Err(StoreError::Duplicate(field.to_string()));
        }

        let Some(record) = tables
            .records
            .iter_mut()
            .find(|record| record.kind == schema.name && record.id == id)
        else {
            return Ok(None);
        };
        record.fields = fields;
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn delete_record(&self, schema: &RecordSchema, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.records.len();
        tables
            .records
            .retain(|record| !(record.kind == schema.name && record.id == id));
        let deleted = tables.records.len() < before;
        if deleted {
            tables.appointments.retain(|row| row.student != id);
        }
        Ok(deleted)
    }

    async fn search_students(&self, query: &str) -> Result<Vec<Record>, StoreError> {
        let needle = query.to_lowercase();
        let tables = self.tables.lock().await;
        let mut matches: Vec<Record> = tables
            .records
            .iter()
            .filter(|record| record.kind == INDIVIDUAL_RECORD_FORM)
            .filter(|record| {
                ["sr_code", "firstname", "lastname"].iter().any(|field| {
                    record
                        .text(field)
                        .is_some_and(|value| value.to_lowercase().contains(&needle))
                })
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.text("sr_code").cmp(&a.text("sr_code")));
        Ok(matches)
    }

    async fn count_problem_values(
        &self,
        filter: &InterviewFilter,
        field: ProblemField,
    ) -> Result<Vec<CategoryCount>, StoreError> {
        let interviews = self.tables.lock().await.interviews();
        Ok(analytics::count_by_value(&interviews, filter, field))
    }

    async fn summarize_problems(&self, range: DateRange) -> Result<ProblemSummary, StoreError> {
        let interviews = self.tables.lock().await.interviews();
        Ok(analytics::summarize_problems(&interviews, range))
    }

    async fn problem_trends(&self) -> Result<ProblemTrends, StoreError> {
        let interviews = self.tables.lock().await.interviews();
        Ok(analytics::problem_trends(&interviews))
    }

    async fn list_appointments(&self, scope: AppointmentScope) -> Result<Vec<Appointment>, StoreError> {
        let tables = self.tables.lock().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .iter()
            .filter(|row| match scope {
                AppointmentScope::All => true,
                AppointmentScope::StudentProfile(profile_id) => tables.records.iter().any(|record| {
                    record.id == row.student
                        && record.kind == INDIVIDUAL_RECORD_FORM
                        && record.owner == Some(profile_id)
                }),
            })
            .filter_map(|row| tables.hydrate(row))
            .collect();
        appointments.sort_by(|a, b| (a.date, a.time, a.id).cmp(&(b.date, b.time, b.id)));
        Ok(appointments)
    }

    async fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, StoreError> {
        let mut tables = self.tables.lock().await;
        let row = AppointmentRow {
            id: tables.next_id(),
            student: appointment.student,
            counselor: appointment.counselor,
            date: appointment.date,
            time: appointment.time,
            reason: appointment.reason,
            created_at: Utc::now(),
        };
        let stored = tables
            .hydrate(&row)
            .ok_or_else(|| StoreError::Corrupt(format!("no record form with id {}", row.student)))?;
        tables.appointments.push(row);
        Ok(stored)
    }

    async fn fetch_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .appointments
            .iter()
            .find(|row| row.id == id)
            .and_then(|row| tables.hydrate(row)))
    }

    async fn delete_appointment(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.appointments.len();
        tables.appointments.retain(|row| row.id != id);
        Ok(tables.appointments.len() < before)
    }
}
