use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::analytics::{CategoryCount, DateRange, InterviewFilter, ProblemField, ProblemSummary, ProblemTrends};
use crate::models::{
    Account, Appointment, AppointmentScope, NewAccount, NewAppointment, Profile, Record,
};
use crate::schema::RecordSchema;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("`{0}` must be unique")]
    Duplicate(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence seam for the API. [`crate::db::PgStore`] backs production,
/// [`crate::memory::MemoryStore`] backs tests and demos.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns `None` when the username is already taken.
    async fn create_account(&self, account: NewAccount) -> Result<Option<Profile>, StoreError>;
    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError>;
    /// Replaces any token the profile's user already holds.
    async fn insert_token(&self, token_hash: &str, profile: &Profile) -> Result<(), StoreError>;
    async fn profile_by_token(&self, token_hash: &str) -> Result<Option<Profile>, StoreError>;

    /// All rows of one collection in the collection's list order.
    async fn list_records(&self, schema: &RecordSchema) -> Result<Vec<Record>, StoreError>;
    async fn insert_record(
        &self,
        schema: &RecordSchema,
        fields: Map<String, Value>,
        owner: Option<i64>,
    ) -> Result<Record, StoreError>;
    async fn fetch_record(&self, schema: &RecordSchema, id: i64) -> Result<Option<Record>, StoreError>;
    async fn find_record(
        &self,
        schema: &RecordSchema,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError>;
    /// Overwrites the stored fields; `None` when the id does not exist.
    async fn replace_record(
        &self,
        schema: &RecordSchema,
        id: i64,
        fields: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError>;
    async fn delete_record(&self, schema: &RecordSchema, id: i64) -> Result<bool, StoreError>;
    /// Case-insensitive substring match over student code and names.
    async fn search_students(&self, query: &str) -> Result<Vec<Record>, StoreError>;

    /// Routine interviews matching `filter`, counted per stored value of `field`.
    async fn count_problem_values(
        &self,
        filter: &InterviewFilter,
        field: ProblemField,
    ) -> Result<Vec<CategoryCount>, StoreError>;
    async fn summarize_problems(&self, range: DateRange) -> Result<ProblemSummary, StoreError>;
    async fn problem_trends(&self) -> Result<ProblemTrends, StoreError>;

    async fn list_appointments(&self, scope: AppointmentScope) -> Result<Vec<Appointment>, StoreError>;
    async fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, StoreError>;
    async fn fetch_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError>;
    async fn delete_appointment(&self, id: i64) -> Result<bool, StoreError>;
}
