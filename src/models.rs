use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference scale every raw grade is rescaled onto.
pub const GRADE_SCALE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeType {
    Exam,
    Quiz,
    Assignment,
    Project,
}

impl GradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeType::Exam => "exam",
            GradeType::Quiz => "quiz",
            GradeType::Assignment => "assignment",
            GradeType::Project => "project",
        }
    }
}

impl FromStr for GradeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exam" => Ok(GradeType::Exam),
            "quiz" => Ok(GradeType::Quiz),
            "assignment" => Ok(GradeType::Assignment),
            "project" => Ok(GradeType::Project),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// Present and excused sessions count toward the attendance rate.
    pub fn is_attended(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Excused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub value: f64,
    pub max_value: f64,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub grade_type: GradeType,
}

impl GradeRecord {
    /// Grade rescaled onto the 0-20 reference scale.
    ///
    /// A non-positive `max_value` yields 0 instead of NaN or infinity. The
    /// ingestion layer rejects such records, so this only matters for records
    /// built by hand.
    pub fn normalized(&self) -> f64 {
        if self.max_value > 0.0 {
            self.value * GRADE_SCALE / self.max_value
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub date: DateTime<Utc>,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactor {
    pub name: String,
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskResult {
    pub score: f64,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub class_code: String,
}

/// Everything a data provider hands over for one student.
#[derive(Debug, Clone)]
pub struct StudentRecords {
    pub profile: StudentProfile,
    pub grades: Vec<GradeRecord>,
    pub attendance: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRisk {
    pub profile: StudentProfile,
    pub grade_count: usize,
    pub attendance_count: usize,
    pub risk: RiskResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlert {
    pub student_id: Uuid,
    pub student_name: String,
    pub class_code: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAnalytics {
    pub class_code: String,
    pub total_students: usize,
    pub average_risk_score: f64,
    pub stability_percentage: f64,
    pub high_risk_count: usize,
    pub medium_risk_count: usize,
    pub low_risk_count: usize,
    pub average_grade: Option<f64>,
    pub average_attendance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub total_students: usize,
    pub total_classes: usize,
    pub high_risk_count: usize,
    pub medium_risk_count: usize,
    pub low_risk_count: usize,
    pub average_score: f64,
    pub average_stability: f64,
    /// Mean of every normalized grade, `None` without any grades.
    pub average_grade: Option<f64>,
    /// Attended share of every session, `None` without attendance records.
    pub average_attendance: Option<f64>,
    pub recent_alerts: Vec<RiskAlert>,
    pub class_analytics: Vec<ClassAnalytics>,
}
