use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::RecordSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Counselor,
    Psychometrician,
    Student,
    Admin,
}

impl Role {
    /// Roles a caller may pick for themselves at registration.
    pub const SELF_SERVICE: [Role; 3] = [Role::Counselor, Role::Psychometrician, Role::Student];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Counselor => "counselor",
            Role::Psychometrician => "psychometrician",
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }

    pub fn is_staff(self) -> bool {
        !matches!(self, Role::Student)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "counselor" => Ok(Role::Counselor),
            "psychometrician" => Ok(Role::Psychometrician),
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub profile: Profile,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

/// One stored form submission, tagged with the collection it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub kind: String,
    pub owner: Option<i64>,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|value| !value.is_null())
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(Value::as_bool)
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        self.text(name)
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
    }

    /// JSON body returned to clients: id, every schema field, the owner key
    /// when the schema binds one, and the timestamps.
    pub fn represent(&self, schema: &RecordSchema) -> Value {
        let mut body = Map::new();
        body.insert("id".to_string(), Value::from(self.id));

        for spec in schema.fields {
            let value = self.fields.get(spec.name).cloned().unwrap_or(Value::Null);
            body.insert(spec.name.to_string(), value);
        }

        if let Some(owner_key) = schema.owner {
            let owner = self.owner.map(Value::from).unwrap_or(Value::Null);
            body.insert(owner_key.to_string(), owner);
        }

        body.insert("created_at".to_string(), Value::from(self.created_at.to_rfc3339()));
        body.insert("updated_at".to_string(), Value::from(self.updated_at.to_rfc3339()));
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appointment {
    pub id: i64,
    /// Id of the individual record form this appointment is for.
    pub student: i64,
    /// Current `sr_code` of that form, joined at read time.
    pub sr_code: String,
    pub counselor: i64,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub student: i64,
    pub counselor: i64,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentScope {
    All,
    /// Only appointments for students whose record form is owned by this profile.
    StudentProfile(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSummary {
    pub sr_code: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
}

impl StudentSummary {
    pub fn from_record(record: &Record) -> Option<Self> {
        let owned = |name: &str| record.text(name).map(str::to_string);
        Some(Self {
            sr_code: owned("sr_code")?,
            firstname: owned("firstname"),
            lastname: owned("lastname"),
            year: owned("year"),
            section: owned("section"),
        })
    }
}
