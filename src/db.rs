use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::ingest::{self, ImportedStudent, ValidationError};
use crate::models::{
    AttendanceRecord, AttendanceStatus, GradeRecord, GradeType, StudentProfile, StudentRecords,
};

/// Which students a fetch covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentScope {
    All,
    Class(String),
    Email(String),
}

impl StudentScope {
    pub fn from_args(class_code: Option<&str>, email: Option<&str>) -> Self {
        match (class_code, email) {
            (Some(code), _) => StudentScope::Class(code.to_string()),
            (None, Some(email)) => StudentScope::Email(email.trim().to_ascii_lowercase()),
            (None, None) => StudentScope::All,
        }
    }

    pub fn label(&self) -> String {
        match self {
            StudentScope::All => "all classes".to_string(),
            StudentScope::Class(code) => format!("class {code}"),
            StudentScope::Email(email) => email.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub students: usize,
    pub grades: usize,
    pub attendance: usize,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_student(
    conn: &mut PgConnection,
    id: Uuid,
    full_name: &str,
    email: &str,
    class_code: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO student_risk.students AS s (id, full_name, email, class_code)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = COALESCE(NULLIF(EXCLUDED.full_name, ''), s.full_name),
            class_code = EXCLUDED.class_code
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(full_name)
    .bind(email)
    .bind(class_code)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert student {email}"))?
    .get("id");
    Ok(id)
}

async fn insert_grade(
    conn: &mut PgConnection,
    student_id: Uuid,
    grade: &GradeRecord,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_risk.grades
        (id, student_id, value, max_value, grade_type, recorded_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(grade.value)
    .bind(grade.max_value)
    .bind(grade.grade_type.as_str())
    .bind(grade.date)
    .bind(source_key)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_attendance(
    conn: &mut PgConnection,
    student_id: Uuid,
    record: &AttendanceRecord,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_risk.attendance
        (id, student_id, status, session_at, source_key)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(record.status.as_str())
    .bind(record.date)
    .bind(source_key)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Grade series per seeded performance profile, oldest first, out of 20.
fn seed_profiles() -> Vec<(&'static str, &'static str, &'static str, Vec<f64>, usize)> {
    vec![
        ("Amal Fassi", "amal.fassi@emsi.example", "1GI", vec![16.5, 17.0, 15.5, 18.0, 16.0, 17.5], 0),
        ("Youssef Alami", "youssef.alami@emsi.example", "1GI", vec![11.0, 12.5, 10.5, 11.5, 12.0], 3),
        ("Karim Benali", "karim.benali@emsi.example", "2GI", vec![8.0, 6.5, 9.0, 4.0, 7.5, 5.0], 7),
        ("Nadia Cherkaoui", "nadia.cherkaoui@emsi.example", "2GI", vec![16.0, 15.5, 14.0, 10.0, 8.5, 7.0], 4),
        ("Imane Tazi", "imane.tazi@emsi.example", "1BTS", vec![14.0], 0),
    ]
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let term_start = Utc
        .with_ymd_and_hms(2026, 2, 2, 8, 30, 0)
        .single()
        .context("invalid seed date")?;
    const SESSIONS: usize = 12;
    let mut tx = pool.begin().await?;

    for (full_name, email, class_code, grades, missed) in seed_profiles() {
        let student_id = upsert_student(&mut tx, Uuid::new_v4(), full_name, email, class_code).await?;

        for (index, value) in grades.iter().enumerate() {
            let grade = GradeRecord {
                value: *value,
                max_value: 20.0,
                date: term_start + Duration::weeks(index as i64 * 2),
                grade_type: if index % 3 == 2 { GradeType::Exam } else { GradeType::Quiz },
            };
            insert_grade(&mut tx, student_id, &grade, &format!("seed-{email}-g{index}")).await?;
        }

        for session in 0..SESSIONS {
            let status = match session {
                s if s < missed && s % 2 == 0 => AttendanceStatus::Absent,
                s if s < missed => AttendanceStatus::Late,
                s if s == SESSIONS - 1 => AttendanceStatus::Excused,
                _ => AttendanceStatus::Present,
            };
            let record = AttendanceRecord {
                date: term_start + Duration::weeks(session as i64),
                status,
            };
            insert_attendance(&mut tx, student_id, &record, &format!("seed-{email}-a{session}"))
                .await?;
        }
        tracing::debug!(email, "seeded student");
    }

    tx.commit().await?;
    Ok(())
}

/// Validates both exports in full, then stores them in one transaction, so a
/// bad row or unknown student leaves the database untouched. Rows without a
/// `source_key` get a fresh key and are inserted again on every import.
pub async fn import_csv(
    pool: &PgPool,
    grades_path: &Path,
    attendance_path: Option<&Path>,
) -> anyhow::Result<ImportStats> {
    let (grade_rows, attendance_rows) = ingest::read_exports(grades_path, attendance_path)?;
    let batch = ingest::prepare_import(grade_rows, attendance_rows)?;

    let mut tx = pool.begin().await?;
    let mut stats = ImportStats::default();
    for student in &batch {
        store_student(&mut tx, student, &mut stats).await?;
    }
    tx.commit().await?;

    tracing::info!(
        students = stats.students,
        grades = stats.grades,
        attendance = stats.attendance,
        "import finished"
    );
    Ok(stats)
}

async fn store_student(
    conn: &mut PgConnection,
    student: &ImportedStudent,
    stats: &mut ImportStats,
) -> anyhow::Result<()> {
    let profile = &student.records.profile;
    let student_id = match student.unknown_profile_row {
        Some(row) => find_student_id(conn, &profile.email).await?.with_context(|| {
            format!(
                "attendance row {row}: unknown student {} and no class_code to create it",
                profile.email
            )
        })?,
        None => {
            stats.students += 1;
            upsert_student(conn, profile.id, &profile.name, &profile.email, &profile.class_code)
                .await?
        }
    };

    for (grade, key) in student.records.grades.iter().zip(&student.grade_keys) {
        if insert_grade(conn, student_id, grade, &source_key(key)).await? {
            stats.grades += 1;
        }
    }
    for (record, key) in student.records.attendance.iter().zip(&student.attendance_keys) {
        if insert_attendance(conn, student_id, record, &source_key(key)).await? {
            stats.attendance += 1;
        }
    }
    Ok(())
}

fn source_key(key: &Option<String>) -> String {
    key.clone().unwrap_or_else(|| format!("import-{}", Uuid::new_v4()))
}

async fn find_student_id(conn: &mut PgConnection, email: &str) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query("SELECT id FROM student_risk.students WHERE email = $1")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|row| row.get("id")))
}

pub async fn fetch_students(
    pool: &PgPool,
    scope: &StudentScope,
) -> anyhow::Result<Vec<StudentRecords>> {
    let mut query = String::from(
        "SELECT id, full_name, email, class_code FROM student_risk.students",
    );
    match scope {
        StudentScope::All => {}
        StudentScope::Class(_) => query.push_str(" WHERE class_code = $1"),
        StudentScope::Email(_) => query.push_str(" WHERE email = $1"),
    }
    query.push_str(" ORDER BY full_name");

    let mut rows = sqlx::query(&query);
    match scope {
        StudentScope::All => {}
        StudentScope::Class(value) | StudentScope::Email(value) => {
            rows = rows.bind(value.as_str())
        }
    }

    let mut students: Vec<StudentRecords> = rows
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| StudentRecords {
            profile: StudentProfile {
                id: row.get("id"),
                name: row.get("full_name"),
                email: row.get("email"),
                class_code: row.get("class_code"),
            },
            grades: Vec::new(),
            attendance: Vec::new(),
        })
        .collect();

    if students.is_empty() {
        return Ok(students);
    }

    let ids: Vec<Uuid> = students.iter().map(|s| s.profile.id).collect();
    let positions: HashMap<Uuid, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let grade_rows = sqlx::query(
        "SELECT student_id, value, max_value, grade_type, recorded_at \
         FROM student_risk.grades WHERE student_id = ANY($1) ORDER BY recorded_at",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    for row in grade_rows {
        let student_id: Uuid = row.get("student_id");
        let grade_type: String = row.get("grade_type");
        let recorded_at: DateTime<Utc> = row.get("recorded_at");
        let grade = GradeRecord {
            value: row.get("value"),
            max_value: row.get("max_value"),
            date: recorded_at,
            grade_type: grade_type
                .parse::<GradeType>()
                .map_err(ValidationError::UnknownGradeType)?,
        };
        if let Some(index) = positions.get(&student_id) {
            students[*index].grades.push(grade);
        }
    }

    let attendance_rows = sqlx::query(
        "SELECT student_id, status, session_at \
         FROM student_risk.attendance WHERE student_id = ANY($1) ORDER BY session_at",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    for row in attendance_rows {
        let student_id: Uuid = row.get("student_id");
        let status: String = row.get("status");
        let record = AttendanceRecord {
            date: row.get("session_at"),
            status: status
                .parse::<AttendanceStatus>()
                .map_err(ValidationError::UnknownStatus)?,
        };
        if let Some(index) = positions.get(&student_id) {
            students[*index].attendance.push(record);
        }
    }

    tracing::debug!(scope = %scope.label(), students = students.len(), "fetched student records");
    Ok(students)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_prefers_class_over_email() {
        assert_eq!(
            StudentScope::from_args(Some("1GI"), None),
            StudentScope::Class("1GI".to_string())
        );
        assert_eq!(
            StudentScope::from_args(None, Some(" Amal.Fassi@Example.edu ")),
            StudentScope::Email("amal.fassi@example.edu".to_string())
        );
        assert_eq!(StudentScope::from_args(None, None), StudentScope::All);
    }

    #[test]
    fn scope_labels() {
        assert_eq!(StudentScope::All.label(), "all classes");
        assert_eq!(StudentScope::Class("2GI".to_string()).label(), "class 2GI");
    }

    #[test]
    fn explicit_source_keys_are_kept() {
        assert_eq!(source_key(&Some("g-2".to_string())), "g-2");

        let fresh = source_key(&None);
        assert!(fresh.starts_with("import-"));
        assert_ne!(fresh, source_key(&None));
    }

    #[test]
    fn seed_profiles_are_valid_grades() {
        for (_, email, _, grades, missed) in seed_profiles() {
            assert!(email.contains('@'));
            assert!(missed < 12);
            assert!(grades.iter().all(|g| (0.0..=20.0).contains(g)));
        }
    }
}
