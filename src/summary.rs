use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{
    ClassAnalytics, RiskAlert, RiskLevel, RiskSummary, StudentRecords, StudentRisk,
};
use crate::risk::{round_one_decimal, RiskEngine};

const MAX_ALERTS: usize = 10;

/// Scores every student independently, highest risk first.
pub fn score_students(engine: &RiskEngine, students: &[StudentRecords]) -> Vec<StudentRisk> {
    let mut scores: Vec<StudentRisk> = students
        .iter()
        .map(|student| {
            let risk = engine.compute_risk(&student.grades, &student.attendance);
            tracing::debug!(
                email = %student.profile.email,
                score = risk.score,
                level = %risk.level,
                "scored student"
            );
            StudentRisk {
                profile: student.profile.clone(),
                grade_count: student.grades.len(),
                attendance_count: student.attendance.len(),
                risk,
            }
        })
        .collect();

    scores.sort_by(|a, b| {
        b.risk
            .score
            .partial_cmp(&a.risk.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.profile.name.cmp(&b.profile.name))
    });
    scores
}

#[derive(Debug, Default, Clone, Copy)]
struct LevelCounts {
    low: usize,
    medium: usize,
    high: usize,
}

impl LevelCounts {
    fn tally<'a>(risks: impl Iterator<Item = &'a StudentRisk>) -> Self {
        let mut counts = Self::default();
        for student in risks {
            match student.risk.level {
                RiskLevel::Low => counts.low += 1,
                RiskLevel::Medium => counts.medium += 1,
                RiskLevel::High => counts.high += 1,
            }
        }
        counts
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn average_score<'a>(risks: impl Iterator<Item = &'a StudentRisk>) -> f64 {
    let (total, count) = risks.fold((0.0, 0usize), |(total, count), student| {
        (total + student.risk.score, count + 1)
    });
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Mean normalized grade over every grade of `students`.
fn average_grade<'a>(students: impl Iterator<Item = &'a StudentRecords>) -> Option<f64> {
    let (total, count) = students
        .flat_map(|student| student.grades.iter())
        .fold((0.0, 0usize), |(total, count), grade| (total + grade.normalized(), count + 1));
    (count > 0).then(|| round_one_decimal(total / count as f64))
}

fn attendance_percentage<'a>(students: impl Iterator<Item = &'a StudentRecords>) -> Option<f64> {
    let (attended, sessions) = students
        .flat_map(|student| student.attendance.iter())
        .fold((0usize, 0usize), |(attended, sessions), record| {
            (attended + usize::from(record.status.is_attended()), sessions + 1)
        });
    (sessions > 0).then(|| round_one_decimal(percentage(attended, sessions)))
}

/// Institution-wide dashboard figures. `students` supplies the raw records
/// for per-class grade and attendance averages; `risks` is the output of
/// [`score_students`] over the same students.
pub fn summarize(students: &[StudentRecords], risks: &[StudentRisk]) -> RiskSummary {
    let counts = LevelCounts::tally(risks.iter());

    let recent_alerts = high_risk_alerts(risks);
    let class_analytics = class_analytics(students, risks);

    RiskSummary {
        total_students: risks.len(),
        total_classes: class_analytics.len(),
        high_risk_count: counts.high,
        medium_risk_count: counts.medium,
        low_risk_count: counts.low,
        average_score: round_one_decimal(average_score(risks.iter())),
        average_stability: round_one_decimal(percentage(counts.low, risks.len())),
        average_grade: average_grade(students.iter()),
        average_attendance: attendance_percentage(students.iter()),
        recent_alerts,
        class_analytics,
    }
}

pub fn high_risk_alerts(risks: &[StudentRisk]) -> Vec<RiskAlert> {
    let mut high: Vec<&StudentRisk> = risks
        .iter()
        .filter(|student| student.risk.level == RiskLevel::High)
        .collect();
    high.sort_by(|a, b| {
        b.risk
            .score
            .partial_cmp(&a.risk.score)
            .unwrap_or(Ordering::Equal)
    });

    high.into_iter()
        .take(MAX_ALERTS)
        .map(|student| RiskAlert {
            student_id: student.profile.id,
            student_name: student.profile.name.clone(),
            class_code: student.profile.class_code.clone(),
            risk_score: student.risk.score,
            risk_level: student.risk.level,
            factors: student.risk.factors.clone(),
            recommendations: student.risk.recommendations.clone(),
        })
        .collect()
}

pub fn class_analytics(students: &[StudentRecords], risks: &[StudentRisk]) -> Vec<ClassAnalytics> {
    let mut classes: BTreeMap<&str, (Vec<&StudentRecords>, Vec<&StudentRisk>)> = BTreeMap::new();
    for student in students {
        classes
            .entry(student.profile.class_code.as_str())
            .or_default()
            .0
            .push(student);
    }
    for risk in risks {
        classes
            .entry(risk.profile.class_code.as_str())
            .or_default()
            .1
            .push(risk);
    }

    classes
        .into_iter()
        .map(|(class_code, (records, scored))| {
            let counts = LevelCounts::tally(scored.iter().copied());

            let average_grade = average_grade(records.iter().copied());
            let average_attendance = attendance_percentage(records.iter().copied());

            ClassAnalytics {
                class_code: class_code.to_string(),
                total_students: records.len().max(scored.len()),
                average_risk_score: round_one_decimal(average_score(scored.iter().copied())),
                stability_percentage: round_one_decimal(percentage(counts.low, scored.len())),
                high_risk_count: counts.high,
                medium_risk_count: counts.medium,
                low_risk_count: counts.low,
                average_grade,
                average_attendance,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttendanceRecord, AttendanceStatus, GradeRecord, GradeType, StudentProfile};
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn student(name: &str, class_code: &str, grades: &[f64], attended: usize, missed: usize) -> StudentRecords {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let grades = grades
            .iter()
            .enumerate()
            .map(|(i, value)| GradeRecord {
                value: *value,
                max_value: 20.0,
                date: start + Duration::days(i as i64),
                grade_type: GradeType::Quiz,
            })
            .collect();
        let attendance = (0..attended + missed)
            .map(|i| AttendanceRecord {
                date: start + Duration::days(i as i64),
                status: if i < attended {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                },
            })
            .collect();

        StudentRecords {
            profile: StudentProfile {
                id: Uuid::new_v4(),
                name: name.to_string(),
                email: format!("{}@example.edu", name.to_lowercase().replace(' ', ".")),
                class_code: class_code.to_string(),
            },
            grades,
            attendance,
        }
    }

    fn cohort() -> Vec<StudentRecords> {
        vec![
            student("Amal Fassi", "1GI", &[18.0, 18.0, 18.0], 10, 0),
            student("Omar Tazi", "1GI", &[12.0, 10.0, 2.0, 1.0, 0.0, 5.0], 5, 5),
            student("Sara Jabri", "2GI", &[], 0, 0),
        ]
    }

    #[test]
    fn scores_sorted_by_descending_risk() {
        let students = cohort();
        let scores = score_students(&RiskEngine::new(), &students);

        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0].profile.name, "Omar Tazi");
        assert_eq!(scores[0].risk.level, RiskLevel::High);
        assert_eq!(scores[0].grade_count, 6);
        assert_eq!(scores[0].attendance_count, 10);
        assert!(scores.windows(2).all(|w| w[0].risk.score >= w[1].risk.score));
    }

    #[test]
    fn equal_scores_order_by_name() {
        let students = vec![
            student("Zineb Alami", "1GI", &[], 0, 0),
            student("Ahmed Benali", "1GI", &[], 0, 0),
        ];
        let scores = score_students(&RiskEngine::new(), &students);
        assert_eq!(scores[0].profile.name, "Ahmed Benali");
        assert_eq!(scores[1].profile.name, "Zineb Alami");
    }

    #[test]
    fn summary_counts_levels_and_alerts() {
        let students = cohort();
        let risks = score_students(&RiskEngine::new(), &students);
        let summary = summarize(&students, &risks);

        assert_eq!(summary.total_students, 3);
        assert_eq!(summary.high_risk_count, 1);
        assert_eq!(summary.low_risk_count, 2);
        assert_eq!(summary.medium_risk_count, 0);
        assert_eq!(summary.average_stability, 66.7);
        assert_eq!(summary.recent_alerts.len(), 1);
        assert_eq!(summary.recent_alerts[0].student_name, "Omar Tazi");
        assert_eq!(summary.recent_alerts[0].factors, risks[0].risk.factors);
        assert_eq!(summary.recent_alerts[0].factors.len(), 4);

        assert_eq!(summary.total_classes, 2);
        // (54 + 30) / 9 grades over the whole cohort
        assert_eq!(summary.average_grade, Some(9.3));
        assert_eq!(summary.average_attendance, Some(75.0));

        let expected = round_one_decimal(risks.iter().map(|r| r.risk.score).sum::<f64>() / 3.0);
        assert_eq!(summary.average_score, expected);
    }

    #[test]
    fn empty_summary_has_zero_averages() {
        let summary = summarize(&[], &[]);
        assert_eq!(summary.total_students, 0);
        assert_eq!(summary.average_score, 0.0);
        assert_eq!(summary.average_stability, 0.0);
        assert_eq!(summary.total_classes, 0);
        assert_eq!(summary.average_grade, None);
        assert_eq!(summary.average_attendance, None);
        assert!(summary.recent_alerts.is_empty());
        assert!(summary.class_analytics.is_empty());
    }

    #[test]
    fn students_without_records_leave_overall_averages_empty() {
        let students = vec![student("Sara Jabri", "2GI", &[], 0, 0)];
        let risks = score_students(&RiskEngine::new(), &students);
        let summary = summarize(&students, &risks);

        assert_eq!(summary.total_students, 1);
        assert_eq!(summary.total_classes, 1);
        assert_eq!(summary.average_grade, None);
        assert_eq!(summary.average_attendance, None);
    }

    #[test]
    fn class_analytics_group_by_class_code() {
        let students = cohort();
        let risks = score_students(&RiskEngine::new(), &students);
        let classes = class_analytics(&students, &risks);

        assert_eq!(classes.len(), 2);
        let first = &classes[0];
        assert_eq!(first.class_code, "1GI");
        assert_eq!(first.total_students, 2);
        assert_eq!(first.high_risk_count, 1);
        assert_eq!(first.low_risk_count, 1);
        assert_eq!(first.stability_percentage, 50.0);
        // (54 + 30) / 9 grades
        assert_eq!(first.average_grade, Some(9.3));
        assert_eq!(first.average_attendance, Some(75.0));

        let second = &classes[1];
        assert_eq!(second.class_code, "2GI");
        assert_eq!(second.average_grade, None);
        assert_eq!(second.average_attendance, None);
        assert_eq!(second.average_risk_score, 25.2);
    }

    #[test]
    fn alerts_are_capped() {
        let students: Vec<_> = (0..12)
            .map(|i| student(&format!("Student {i:02}"), "1BTS", &[2.0, 1.0, 0.0], 1, 9))
            .collect();
        let risks = score_students(&RiskEngine::new(), &students);
        assert_eq!(high_risk_alerts(&risks).len(), MAX_ALERTS);
    }
}
