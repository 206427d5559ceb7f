//! Collection descriptors.
//!
//! Every form the guidance office keeps is a flat set of typed fields, so the
//! collections are described as data and served by one set of CRUD handlers.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::Record;

pub const ROUTINE_INTERVIEW: &str = "routine_interview";
pub const INDIVIDUAL_RECORD_FORM: &str = "individual_record_form";
pub const RESOURCE: &str = "resource";

const TEXT_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    LongText,
    Boolean,
    Date,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    IdAscending,
    IdDescending,
    FieldDescending(&'static str),
    CreatedThenModifiedDescending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Open,
    Authenticated,
}

#[derive(Debug)]
pub struct RecordSchema {
    /// URL segment and storage tag.
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
    pub order: ListOrder,
    pub access: Access,
    /// Representation key for the creating profile, when the collection binds one.
    pub owner: Option<&'static str>,
    pub staff_create: bool,
    pub unique: &'static [&'static str],
}

use FieldKind::{Boolean, Date, Integer, LongText, Text};

const ROUTINE_INTERVIEW_FIELDS: &[FieldSpec] = &[
    required("name", Text),
    required("grade", Text),
    optional("section", Text),
    required("date", Date),
    optional("nature_of_problem", Text),
    optional("family_problem", Boolean),
    optional("friends_problem", Boolean),
    optional("health_problem", Boolean),
    optional("academic_problem", Boolean),
    optional("career_problem", Boolean),
    optional("details", LongText),
    optional("remarks", LongText),
];

const INDIVIDUAL_RECORD_FIELDS: &[FieldSpec] = &[
    required("sr_code", Text),
    required("firstname", Text),
    optional("middlename", Text),
    required("lastname", Text),
    optional("year", Text),
    optional("section", Text),
    optional("course", Text),
    optional("birthdate", Date),
    optional("sex", Text),
    optional("contact_number", Text),
    optional("address", LongText),
    optional("guardian_name", Text),
    optional("guardian_contact", Text),
];

const CAREER_TRACKING_FIELDS: &[FieldSpec] = &[
    required("name", Text),
    required("grade", Text),
    optional("section", Text),
    optional("cle", Text),
    optional("english", Text),
    optional("filipino", Text),
    optional("ap", Text),
    optional("science", Text),
    optional("math", Text),
    optional("mapeh", Text),
    optional("tle", Text),
    optional("computer", Text),
    optional("fl", Text),
    optional("academic_track", Text),
    optional("other_track", Text),
    optional("tech_voc", Text),
    optional("other_techvoc", Text),
    optional("preferredCourse", Text),
    optional("medical_records", Text),
    optional("specify", Text),
    optional("academic_status", Text),
    optional("hobbies", Text),
    optional("cognitive", Text),
    optional("emotional", Text),
    optional("personality", Text),
];

const CONFERENCE_FIELDS: &[FieldSpec] = &[
    required("name", Text),
    required("date", Date),
    optional("grade", Text),
    optional("section", Text),
    optional("concern", LongText),
    optional("participants", LongText),
    optional("agreements", LongText),
    optional("counselor_notes", LongText),
];

const IMPACT_EVALUATION_FIELDS: &[FieldSpec] = &[
    required("name", Text),
    optional("grade", Text),
    optional("section", Text),
    required("date", Date),
    optional("knowledge_gained", Integer),
    optional("skills_applied", Integer),
    optional("attitude_change", Integer),
    optional("overall_rating", Integer),
    optional("comments", LongText),
];

const COUNSELING_SERVICE_EVALUATION_FIELDS: &[FieldSpec] = &[
    optional("name", Text),
    required("date", Date),
    optional("counselor", Text),
    optional("accessibility", Integer),
    optional("responsiveness", Integer),
    optional("helpfulness", Integer),
    optional("confidentiality", Integer),
    optional("overall_rating", Integer),
    optional("comments", LongText),
];

const GUIDANCE_CLASS_EVALUATION_FIELDS: &[FieldSpec] = &[
    required("grade", Text),
    optional("section", Text),
    required("date", Date),
    required("topic", Text),
    optional("facilitator", Text),
    optional("objectives_met", Integer),
    optional("relevance", Integer),
    optional("delivery", Integer),
    optional("comments", LongText),
];

/// Shared by the kinder through fourth-year inventories.
const GRADE_LEVEL_FIELDS: &[FieldSpec] = &[
    required("name", Text),
    optional("sr_code", Text),
    optional("section", Text),
    optional("school_year", Text),
    optional("adviser", Text),
    optional("date", Date),
    optional("academic_concern", Boolean),
    optional("behavioral_concern", Boolean),
    optional("referred", Boolean),
    optional("notes", LongText),
];

const RESOURCE_FIELDS: &[FieldSpec] = &[
    required("title", Text),
    required("content", LongText),
    optional("description", LongText),
];

const fn form(name: &'static str, fields: &'static [FieldSpec], access: Access) -> RecordSchema {
    RecordSchema {
        name,
        fields,
        order: ListOrder::IdDescending,
        access,
        owner: None,
        staff_create: false,
        unique: &[],
    }
}

pub static SCHEMAS: &[RecordSchema] = &[
    RecordSchema {
        order: ListOrder::IdAscending,
        ..form(ROUTINE_INTERVIEW, ROUTINE_INTERVIEW_FIELDS, Access::Open)
    },
    RecordSchema {
        order: ListOrder::FieldDescending("sr_code"),
        owner: Some("profile"),
        unique: &["sr_code"],
        ..form(INDIVIDUAL_RECORD_FORM, INDIVIDUAL_RECORD_FIELDS, Access::Open)
    },
    form("careertracking", CAREER_TRACKING_FIELDS, Access::Open),
    form("conferenceform", CONFERENCE_FIELDS, Access::Open),
    form("ms_impactevaluation", IMPACT_EVALUATION_FIELDS, Access::Open),
    form(
        "ms_counselingserviceevaluation",
        COUNSELING_SERVICE_EVALUATION_FIELDS,
        Access::Open,
    ),
    form(
        "guidance_class_evaluation",
        GUIDANCE_CLASS_EVALUATION_FIELDS,
        Access::Open,
    ),
    form("kinder", GRADE_LEVEL_FIELDS, Access::Authenticated),
    form("grade_one", GRADE_LEVEL_FIELDS, Access::Authenticated),
    form("grade_two", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_three", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_four", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_five", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_six", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_seven", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_eight", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_nine", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_ten", GRADE_LEVEL_FIELDS, Access::Open),
    form("grade_eleven", GRADE_LEVEL_FIELDS, Access::Authenticated),
    form("grade_twelve", GRADE_LEVEL_FIELDS, Access::Authenticated),
    form("first_year", GRADE_LEVEL_FIELDS, Access::Authenticated),
    form("second_year", GRADE_LEVEL_FIELDS, Access::Authenticated),
    form("third_year", GRADE_LEVEL_FIELDS, Access::Authenticated),
    form("fourth_year", GRADE_LEVEL_FIELDS, Access::Authenticated),
    RecordSchema {
        order: ListOrder::CreatedThenModifiedDescending,
        owner: Some("author"),
        staff_create: true,
        ..form(RESOURCE, RESOURCE_FIELDS, Access::Authenticated)
    },
];

pub fn lookup(name: &str) -> Option<&'static RecordSchema> {
    SCHEMAS.iter().find(|schema| schema.name == name)
}

/// Per-field validation messages, serialized as `{"field": ["message", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

impl RecordSchema {
    #[cfg(test)]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Checks a payload against the field set and returns the normalized
    /// values to store. With `partial`, absent fields are skipped instead of
    /// being reported or nulled.
    pub fn validate(&self, payload: &Value, partial: bool) -> Result<Map<String, Value>, FieldErrors> {
        let Some(object) = payload.as_object() else {
            return Err(FieldErrors::single(
                "non_field_errors",
                format!(
                    "Invalid data. Expected a dictionary, but got {}.",
                    json_type_name(payload)
                ),
            ));
        };

        let mut errors = FieldErrors::default();
        let mut clean = Map::new();

        for spec in self.fields {
            match object.get(spec.name) {
                None if partial => {}
                None if spec.required => errors.add(spec.name, "This field is required."),
                None => {
                    clean.insert(spec.name.to_string(), Value::Null);
                }
                Some(value) => match spec.normalize(value) {
                    Ok(value) => {
                        clean.insert(spec.name.to_string(), value);
                    }
                    Err(message) => errors.add(spec.name, message),
                },
            }
        }

        if errors.is_empty() {
            Ok(clean)
        } else {
            Err(errors)
        }
    }

    pub fn sort(&self, records: &mut [Record]) {
        match self.order {
            ListOrder::IdAscending => records.sort_by_key(|record| record.id),
            ListOrder::IdDescending => records.sort_by(|a, b| b.id.cmp(&a.id)),
            ListOrder::FieldDescending(field) => records.sort_by(|a, b| {
                compare_field(b, a, field).then_with(|| b.id.cmp(&a.id))
            }),
            ListOrder::CreatedThenModifiedDescending => records.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.updated_at.cmp(&a.updated_at))
                    .then_with(|| b.id.cmp(&a.id))
            }),
        }
    }
}

fn compare_field(a: &Record, b: &Record, field: &str) -> Ordering {
    let key = |record: &Record| record.field(field).map(Value::to_string);
    key(a).cmp(&key(b))
}

impl FieldSpec {
    fn normalize(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return if self.required {
                Err("This field may not be null.".to_string())
            } else {
                Ok(Value::Null)
            };
        }

        match self.kind {
            FieldKind::Text | FieldKind::LongText => {
                let text = match value {
                    Value::String(text) => text.trim().to_string(),
                    Value::Number(number) => number.to_string(),
                    _ => return Err("Not a valid string.".to_string()),
                };
                if text.is_empty() && self.required {
                    return Err("This field may not be blank.".to_string());
                }
                if self.kind == FieldKind::Text && text.chars().count() > TEXT_MAX_CHARS {
                    return Err(format!(
                        "Ensure this field has no more than {TEXT_MAX_CHARS} characters."
                    ));
                }
                Ok(Value::String(text))
            }
            FieldKind::Boolean => parse_bool(value)
                .map(Value::Bool)
                .ok_or_else(|| "Must be a valid boolean.".to_string()),
            FieldKind::Date => value
                .as_str()
                .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
                .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| {
                    "Date has wrong format. Use one of these formats instead: YYYY-MM-DD."
                        .to_string()
                }),
            FieldKind::Integer => {
                let parsed = match value {
                    Value::Number(number) => number.as_i64(),
                    Value::String(raw) => raw.trim().parse::<i64>().ok(),
                    _ => None,
                };
                parsed
                    .map(Value::from)
                    .ok_or_else(|| "A valid integer is required.".to_string())
            }
        }
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "t" | "y" => Some(true),
            "false" | "0" | "no" | "off" | "f" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
