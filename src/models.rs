use std::fmt;

use serde::{Deserialize, Serialize};

/// A grade cell as shown by the portal. Serialized as `null` or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Grade {
    Unposted,
    Posted(String),
}

impl Grade {
    // The portal renders missing grades as "-".
    pub fn from_cell(text: &str) -> Self {
        match text.trim() {
            "" | "-" => Grade::Unposted,
            value => Grade::Posted(value.to_string()),
        }
    }
}

impl From<Option<String>> for Grade {
    fn from(value: Option<String>) -> Self {
        value.map_or(Grade::Unposted, Grade::Posted)
    }
}

impl From<Grade> for Option<String> {
    fn from(grade: Grade) -> Self {
        match grade {
            Grade::Unposted => None,
            Grade::Posted(value) => Some(value),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Unposted => f.write_str("-"),
            Grade::Posted(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GradeRecord {
    pub course: String,
    #[serde(rename = "examType")]
    pub exam_type: String,
    pub grade: Grade,
}

impl GradeRecord {
    pub fn new(course: impl Into<String>, exam_type: impl Into<String>, grade: Grade) -> Self {
        Self {
            course: course.into(),
            exam_type: exam_type.into(),
            grade,
        }
    }

    /// Records are matched across snapshots by (course, exam type).
    pub fn same_exam(&self, other: &GradeRecord) -> bool {
        self.course == other.course && self.exam_type == other.exam_type
    }
}

/// The full result listing as observed by one fetch, in portal order.
pub type Snapshot = Vec<GradeRecord>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub record: GradeRecord,
    /// `None` when the exam was not part of the previous snapshot.
    pub previous: Option<Grade>,
}

/// Transport-neutral chat identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
