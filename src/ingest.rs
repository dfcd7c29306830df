use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AttendanceRecord, AttendanceStatus, GradeRecord, GradeType, StudentProfile, StudentRecords,
};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("grade max value must be positive, got {0}")]
    NonPositiveMax(f64),
    #[error("grade value must be a non-negative number, got {0}")]
    InvalidValue(f64),
    #[error("unknown grade type '{0}'")]
    UnknownGradeType(String),
    #[error("unknown attendance status '{0}'")]
    UnknownStatus(String),
    #[error("invalid date '{0}', expected RFC 3339 or YYYY-MM-DD")]
    InvalidDate(String),
    #[error("missing student email")]
    MissingEmail,
}

/// Accepts RFC 3339 timestamps or plain dates (taken as midnight UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidDate(raw.to_string()))
}

pub fn validate_grade(
    value: f64,
    max_value: f64,
    date: &str,
    grade_type: &str,
) -> Result<GradeRecord, ValidationError> {
    if !max_value.is_finite() || max_value <= 0.0 {
        return Err(ValidationError::NonPositiveMax(max_value));
    }
    if !value.is_finite() || value < 0.0 {
        return Err(ValidationError::InvalidValue(value));
    }
    let grade_type = grade_type
        .parse::<GradeType>()
        .map_err(ValidationError::UnknownGradeType)?;

    Ok(GradeRecord {
        value,
        max_value,
        date: parse_timestamp(date)?,
        grade_type,
    })
}

pub fn validate_attendance(date: &str, status: &str) -> Result<AttendanceRecord, ValidationError> {
    let status = status
        .parse::<AttendanceStatus>()
        .map_err(ValidationError::UnknownStatus)?;

    Ok(AttendanceRecord {
        date: parse_timestamp(date)?,
        status,
    })
}

#[derive(Debug, Deserialize)]
pub struct GradeRow {
    pub email: String,
    pub full_name: String,
    pub class_code: String,
    pub value: f64,
    pub max_value: f64,
    pub date: String,
    #[serde(rename = "type")]
    pub grade_type: String,
    #[serde(default)]
    pub source_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRow {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub class_code: Option<String>,
    pub date: String,
    pub status: String,
    #[serde(default)]
    pub source_key: Option<String>,
}

pub fn read_grade_rows<R: Read>(reader: R) -> anyhow::Result<Vec<GradeRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<GradeRow>().enumerate() {
        rows.push(result.with_context(|| format!("malformed grade row {}", index + 1))?);
    }
    Ok(rows)
}

pub fn read_attendance_rows<R: Read>(reader: R) -> anyhow::Result<Vec<AttendanceRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<AttendanceRow>().enumerate() {
        rows.push(result.with_context(|| format!("malformed attendance row {}", index + 1))?);
    }
    Ok(rows)
}

/// One student's validated records from a CSV export, with the `source_key`
/// each record carried (same order as `records.grades` / `records.attendance`).
#[derive(Debug, Clone)]
pub struct ImportedStudent {
    pub records: StudentRecords,
    pub grade_keys: Vec<Option<String>>,
    pub attendance_keys: Vec<Option<String>>,
    /// Attendance row (1-based) that introduced a student with neither grades
    /// nor a `class_code`. Such a student must already be stored.
    pub unknown_profile_row: Option<usize>,
}

impl ImportedStudent {
    pub fn needs_existing_profile(&self) -> bool {
        self.unknown_profile_row.is_some()
    }
}

/// Validates every row and groups them by normalized email. Nothing is
/// returned unless the whole export is valid.
pub fn prepare_import(
    grade_rows: Vec<GradeRow>,
    attendance_rows: Vec<AttendanceRow>,
) -> anyhow::Result<Vec<ImportedStudent>> {
    let mut students: BTreeMap<String, ImportedStudent> = BTreeMap::new();

    for (index, row) in grade_rows.into_iter().enumerate() {
        let email = normalize_email(&row.email)
            .with_context(|| format!("grade row {}", index + 1))?;
        let grade = validate_grade(row.value, row.max_value, &row.date, &row.grade_type)
            .with_context(|| format!("grade row {} ({})", index + 1, email))?;
        let entry = students.entry(email.clone()).or_insert_with(|| ImportedStudent {
            records: empty_student(&email, &row.full_name, &row.class_code),
            grade_keys: Vec::new(),
            attendance_keys: Vec::new(),
            unknown_profile_row: None,
        });
        entry.records.grades.push(grade);
        entry.grade_keys.push(clean_key(row.source_key));
    }

    for (index, row) in attendance_rows.into_iter().enumerate() {
        let email = normalize_email(&row.email)
            .with_context(|| format!("attendance row {}", index + 1))?;
        let record = validate_attendance(&row.date, &row.status)
            .with_context(|| format!("attendance row {} ({})", index + 1, email))?;
        let class_code = row.class_code.as_deref().filter(|code| !code.trim().is_empty());
        let full_name = row.full_name.as_deref().unwrap_or("");

        let entry = students.entry(email.clone()).or_insert_with(|| ImportedStudent {
            records: empty_student(&email, full_name, class_code.unwrap_or("")),
            grade_keys: Vec::new(),
            attendance_keys: Vec::new(),
            unknown_profile_row: class_code.is_none().then_some(index + 1),
        });
        if entry.needs_existing_profile() {
            if let Some(code) = class_code {
                entry.records = StudentRecords {
                    grades: Vec::new(),
                    attendance: std::mem::take(&mut entry.records.attendance),
                    ..empty_student(&email, full_name, code)
                };
                entry.unknown_profile_row = None;
            }
        }
        entry.records.attendance.push(record);
        entry.attendance_keys.push(clean_key(row.source_key));
    }

    Ok(students.into_values().collect())
}

/// Groups validated CSV rows into per-student record sets, ordered by email.
///
/// A student that only appears in the attendance file needs `full_name` and
/// `class_code` there; otherwise the grade file supplies the profile.
pub fn group_rows(
    grade_rows: Vec<GradeRow>,
    attendance_rows: Vec<AttendanceRow>,
) -> anyhow::Result<Vec<StudentRecords>> {
    prepare_import(grade_rows, attendance_rows)?
        .into_iter()
        .map(|student| match student.unknown_profile_row {
            Some(row) => Err(anyhow::anyhow!(
                "attendance row {} ({}) needs class_code for a student without grades",
                row,
                student.records.profile.email
            )),
            None => Ok(student.records),
        })
        .collect()
}

/// Reads the grade export and, when given, the attendance export.
pub fn read_exports(
    grades: &Path,
    attendance: Option<&Path>,
) -> anyhow::Result<(Vec<GradeRow>, Vec<AttendanceRow>)> {
    let grade_rows = read_grade_rows(open_export(grades)?)?;
    let attendance_rows = match attendance {
        Some(path) => read_attendance_rows(open_export(path)?)?,
        None => Vec::new(),
    };
    Ok((grade_rows, attendance_rows))
}

pub fn load_csv_files(grades: &Path, attendance: Option<&Path>) -> anyhow::Result<Vec<StudentRecords>> {
    let (grade_rows, attendance_rows) = read_exports(grades, attendance)?;
    let students = group_rows(grade_rows, attendance_rows)?;
    tracing::info!(students = students.len(), "loaded records from csv");
    Ok(students)
}

fn open_export(path: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

fn clean_key(key: Option<String>) -> Option<String> {
    key.map(|key| key.trim().to_string()).filter(|key| !key.is_empty())
}

fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() {
        Err(ValidationError::MissingEmail)
    } else {
        Ok(email)
    }
}

fn empty_student(email: &str, full_name: &str, class_code: &str) -> StudentRecords {
    StudentRecords {
        profile: StudentProfile {
            id: Uuid::new_v4(),
            name: full_name.trim().to_string(),
            email: email.to_string(),
            class_code: class_code.trim().to_string(),
        },
        grades: Vec::new(),
        attendance: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GRADES: &str = "\
email,full_name,class_code,value,max_value,date,type,source_key
amal.fassi@example.edu,Amal Fassi,1GI,15,20,2026-01-10,exam,
amal.fassi@example.edu,Amal Fassi,1GI,70,100,2026-01-24T08:30:00Z,quiz,g-2
omar.tazi@example.edu,Omar Tazi,2GI,8,20,2026-01-12,assignment,
";

    const ATTENDANCE: &str = "\
email,full_name,class_code,date,status,source_key
amal.fassi@example.edu,,,2026-01-10,present,
AMAL.FASSI@example.edu,,,2026-01-11,late,
sara.jabri@example.edu,Sara Jabri,1BTS,2026-01-11,excused,
";

    #[test]
    fn rejects_zero_max_value() {
        assert_eq!(
            validate_grade(10.0, 0.0, "2026-01-10", "exam"),
            Err(ValidationError::NonPositiveMax(0.0))
        );
    }

    #[test]
    fn rejects_negative_value() {
        assert_eq!(
            validate_grade(-1.0, 20.0, "2026-01-10", "exam"),
            Err(ValidationError::InvalidValue(-1.0))
        );
    }

    #[test]
    fn rejects_unknown_categories() {
        assert_eq!(
            validate_grade(10.0, 20.0, "2026-01-10", "homework"),
            Err(ValidationError::UnknownGradeType("homework".to_string()))
        );
        assert_eq!(
            validate_attendance("2026-01-10", "remote"),
            Err(ValidationError::UnknownStatus("remote".to_string()))
        );
    }

    #[test]
    fn parses_dates_and_timestamps() {
        let plain = parse_timestamp("2026-01-10").unwrap();
        assert_eq!(plain.to_rfc3339(), "2026-01-10T00:00:00+00:00");

        let offset = parse_timestamp("2026-01-10T10:00:00+02:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2026-01-10T08:00:00+00:00");

        assert!(matches!(
            parse_timestamp("10/01/2026"),
            Err(ValidationError::InvalidDate(_))
        ));
    }

    #[test]
    fn groups_rows_by_student_email() {
        let grades = read_grade_rows(GRADES.as_bytes()).unwrap();
        let attendance = read_attendance_rows(ATTENDANCE.as_bytes()).unwrap();
        let students = group_rows(grades, attendance).unwrap();

        let emails: Vec<&str> = students.iter().map(|s| s.profile.email.as_str()).collect();
        assert_eq!(
            emails,
            ["amal.fassi@example.edu", "omar.tazi@example.edu", "sara.jabri@example.edu"]
        );

        let amal = &students[0];
        assert_eq!(amal.profile.class_code, "1GI");
        assert_eq!(amal.grades.len(), 2);
        assert_eq!(amal.attendance.len(), 2);
        assert_eq!(amal.attendance[1].status, AttendanceStatus::Late);

        let sara = &students[2];
        assert!(sara.grades.is_empty());
        assert_eq!(sara.profile.name, "Sara Jabri");
    }

    #[test]
    fn attendance_only_student_needs_class_code() {
        let attendance = read_attendance_rows(
            "email,date,status\nnew.student@example.edu,2026-01-10,present\n".as_bytes(),
        )
        .unwrap();
        let err = group_rows(Vec::new(), attendance).unwrap_err();
        assert!(err.to_string().contains("needs class_code"));
    }

    #[test]
    fn invalid_row_reports_position() {
        let grades = read_grade_rows(
            "email,full_name,class_code,value,max_value,date,type\na@example.edu,A,1GI,5,0,2026-01-10,exam\n"
                .as_bytes(),
        )
        .unwrap();
        let err = group_rows(grades, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("grade row 1"));
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::NonPositiveMax(_))
        ));
    }

    #[test]
    fn prepared_import_keeps_source_keys_per_record() {
        let grades = read_grade_rows(GRADES.as_bytes()).unwrap();
        let attendance = read_attendance_rows(ATTENDANCE.as_bytes()).unwrap();
        let batch = prepare_import(grades, attendance).unwrap();

        assert_eq!(batch.len(), 3);
        let amal = &batch[0];
        assert_eq!(amal.grade_keys, [None, Some("g-2".to_string())]);
        assert_eq!(amal.attendance_keys, [None, None]);
        assert_eq!(amal.records.grades.len(), amal.grade_keys.len());
        assert!(batch.iter().all(|student| !student.needs_existing_profile()));
    }

    #[test]
    fn invalid_later_row_rejects_whole_batch() {
        let grades = read_grade_rows(
            "email,full_name,class_code,value,max_value,date,type\n\
             a@example.edu,A,1GI,12,20,2026-01-10,exam\n\
             b@example.edu,B,1GI,15,20,not-a-date,quiz\n"
                .as_bytes(),
        )
        .unwrap();
        let err = prepare_import(grades, Vec::new()).unwrap_err();

        assert!(err.to_string().contains("grade row 2"));
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::InvalidDate(_))
        ));
    }

    #[test]
    fn blank_email_is_rejected() {
        let grades = read_grade_rows(
            "email,full_name,class_code,value,max_value,date,type\n  ,A,1GI,12,20,2026-01-10,exam\n"
                .as_bytes(),
        )
        .unwrap();
        let err = prepare_import(grades, Vec::new()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::MissingEmail)
        );
    }

    #[test]
    fn attendance_only_student_without_class_needs_existing_profile() {
        let attendance = read_attendance_rows(
            "email,date,status\nnew.student@example.edu,2026-01-10,present\n".as_bytes(),
        )
        .unwrap();
        let batch = prepare_import(Vec::new(), attendance).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].unknown_profile_row, Some(1));
        assert_eq!(batch[0].records.attendance.len(), 1);
    }

    #[test]
    fn later_attendance_row_supplies_missing_profile() {
        let attendance = read_attendance_rows(
            "email,full_name,class_code,date,status\n\
             new.student@example.edu,,,2026-01-10,present\n\
             new.student@example.edu,New Student,1BTS,2026-01-11,absent\n"
                .as_bytes(),
        )
        .unwrap();
        let students = group_rows(Vec::new(), attendance).unwrap();

        assert_eq!(students.len(), 1);
        assert_eq!(students[0].profile.class_code, "1BTS");
        assert_eq!(students[0].profile.name, "New Student");
        assert_eq!(students[0].attendance.len(), 2);
    }

    #[test]
    fn sample_exports_parse() {
        let grades = read_grade_rows(include_str!("../data/grades.csv").as_bytes()).unwrap();
        let attendance =
            read_attendance_rows(include_str!("../data/attendance.csv").as_bytes()).unwrap();
        let students = group_rows(grades, attendance).unwrap();

        assert_eq!(students.len(), 3);
        let karim = students
            .iter()
            .find(|s| s.profile.email == "karim.benali@emsi.example")
            .unwrap();
        let normalized: Vec<f64> = karim.grades.iter().map(|g| g.normalized()).collect();
        assert_eq!(normalized, [13.0, 9.0, 6.0, 3.0]);
    }

    #[test]
    fn loads_csv_files_from_disk() {
        let mut grades = tempfile::NamedTempFile::new().unwrap();
        grades.write_all(GRADES.as_bytes()).unwrap();
        let mut attendance = tempfile::NamedTempFile::new().unwrap();
        attendance.write_all(ATTENDANCE.as_bytes()).unwrap();

        let students = load_csv_files(grades.path(), Some(attendance.path())).unwrap();
        assert_eq!(students.len(), 3);

        let grades_only = load_csv_files(grades.path(), None).unwrap();
        assert_eq!(grades_only.len(), 2);
        assert!(grades_only.iter().all(|s| s.attendance.is_empty()));

        let (grade_rows, attendance_rows) =
            read_exports(grades.path(), Some(attendance.path())).unwrap();
        assert_eq!((grade_rows.len(), attendance_rows.len()), (3, 3));
    }

    #[test]
    fn missing_export_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("grades.csv");
        let err = read_exports(&missing, None).unwrap_err();
        assert!(err.to_string().contains("grades.csv"));
    }
}
