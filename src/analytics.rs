use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::models::Record;

/// Grade labels in chart order.
pub const GRADE_ORDER: [&str; 17] = [
    "Kinder", "Grade 1", "Grade 2", "Grade 3", "Grade 4", "Grade 5", "Grade 6", "Grade 7",
    "Grade 8", "Grade 9", "Grade 10", "Grade 11", "Grade 12", "1st Year", "2nd Year",
    "3rd Year", "4th Year",
];

pub const DATE_FORMAT_HINT: &str = "Invalid date format. Use YYYY-MM-DD.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProblemField {
    Family,
    Friends,
    Health,
    Academic,
    Career,
}

impl ProblemField {
    pub const ALL: [ProblemField; 5] = [
        ProblemField::Family,
        ProblemField::Friends,
        ProblemField::Health,
        ProblemField::Academic,
        ProblemField::Career,
    ];

    pub fn column(self) -> &'static str {
        match self {
            ProblemField::Family => "family_problem",
            ProblemField::Friends => "friends_problem",
            ProblemField::Health => "health_problem",
            ProblemField::Academic => "academic_problem",
            ProblemField::Career => "career_problem",
        }
    }

    /// Path prefix of the per-category endpoint, e.g. `familyproblem`.
    pub fn slug(self) -> &'static str {
        match self {
            ProblemField::Family => "familyproblem",
            ProblemField::Friends => "friendsproblem",
            ProblemField::Health => "healthproblem",
            ProblemField::Academic => "academicproblem",
            ProblemField::Career => "careerproblem",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date `{0}`, expected YYYY-MM-DD")]
pub struct InvalidDate(pub String);

/// Inclusive bounds; an absent bound leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, InvalidDate> {
        Ok(Self {
            start: parse_bound(start)?,
            end: parse_bound(end)?,
        })
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

fn parse_bound(raw: Option<&str>) -> Result<Option<NaiveDate>, InvalidDate> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| InvalidDate(raw.to_string())),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterviewFilter {
    pub grade: Option<String>,
    pub range: DateRange,
}

impl InterviewFilter {
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(grade) = &self.grade {
            if record.text("grade") != Some(grade.as_str()) {
                return false;
            }
        }

        if self.range.is_open() {
            return true;
        }

        record
            .date("date")
            .is_some_and(|date| self.range.contains(date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub field: ProblemField,
    pub value: bool,
    pub count: usize,
}

impl Serialize for CategoryCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.field.column(), &self.value)?;
        map.serialize_entry("count", &self.count)?;
        map.end()
    }
}

/// Counts matching interviews per distinct non-null value of `field`.
pub fn count_by_value(
    records: &[Record],
    filter: &InterviewFilter,
    field: ProblemField,
) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<bool, usize> = BTreeMap::new();

    for record in records.iter().filter(|record| filter.matches(record)) {
        if let Some(value) = record.flag(field.column()) {
            *counts.entry(value).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|(value, count)| CategoryCount { field, value, count })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProblemSummary {
    pub family_problem_count: usize,
    pub friends_problem_count: usize,
    pub health_problem_count: usize,
    pub academic_problem_count: usize,
    pub career_problem_count: usize,
}

/// Number of answered (non-null) entries per problem field.
///
/// `range` bounds the interview's own `date` field, not the time the row was
/// created, so back-dated interviews are counted by when they took place.
pub fn summarize_problems(records: &[Record], range: DateRange) -> ProblemSummary {
    let filter = InterviewFilter { grade: None, range };
    let mut summary = ProblemSummary::default();

    for record in records.iter().filter(|record| filter.matches(record)) {
        for field in ProblemField::ALL {
            if record.flag(field.column()).is_some() {
                *summary.slot(field) += 1;
            }
        }
    }

    summary
}

impl ProblemSummary {
    pub fn slot(&mut self, field: ProblemField) -> &mut usize {
        match field {
            ProblemField::Family => &mut self.family_problem_count,
            ProblemField::Friends => &mut self.friends_problem_count,
            ProblemField::Health => &mut self.health_problem_count,
            ProblemField::Academic => &mut self.academic_problem_count,
            ProblemField::Career => &mut self.career_problem_count,
        }
    }
}

/// One series per problem field, indexed like [`GRADE_ORDER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemTrends {
    pub family_problem_counts: Vec<usize>,
    pub friends_problem_counts: Vec<usize>,
    pub health_problem_counts: Vec<usize>,
    pub academic_problem_counts: Vec<usize>,
    pub career_problem_counts: Vec<usize>,
}

impl Default for ProblemTrends {
    fn default() -> Self {
        let zeroes = || vec![0; GRADE_ORDER.len()];
        Self {
            family_problem_counts: zeroes(),
            friends_problem_counts: zeroes(),
            health_problem_counts: zeroes(),
            academic_problem_counts: zeroes(),
            career_problem_counts: zeroes(),
        }
    }
}

impl ProblemTrends {
    /// Adds `count` interviews of `grade` flagging `field`. Grades outside
    /// [`GRADE_ORDER`] are not charted and are dropped.
    pub fn add(&mut self, grade: &str, field: ProblemField, count: usize) {
        if let Some(slot) = GRADE_ORDER.iter().position(|known| *known == grade) {
            self.series(field)[slot] += count;
        }
    }

    fn series(&mut self, field: ProblemField) -> &mut Vec<usize> {
        match field {
            ProblemField::Family => &mut self.family_problem_counts,
            ProblemField::Friends => &mut self.friends_problem_counts,
            ProblemField::Health => &mut self.health_problem_counts,
            ProblemField::Academic => &mut self.academic_problem_counts,
            ProblemField::Career => &mut self.career_problem_counts,
        }
    }
}

/// For each grade in [`GRADE_ORDER`], how many interviews flag each problem.
pub fn problem_trends(records: &[Record]) -> ProblemTrends {
    let mut trends = ProblemTrends::default();

    for record in records {
        let Some(grade) = record.text("grade") else {
            continue;
        };
        for field in ProblemField::ALL {
            if record.flag(field.column()) == Some(true) {
                trends.add(grade, field, 1);
            }
        }
    }

    trends
}
