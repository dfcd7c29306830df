use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{RiskLevel, RiskSummary, StudentRisk};

const TOP_STUDENTS: usize = 10;

fn format_optional(value: Option<f64>, suffix: &str) -> String {
    match value {
        Some(value) => format!("{value:.1}{suffix}"),
        None => "n/a".to_string(),
    }
}

/// Renders a markdown risk report. `risks` must already be sorted by
/// descending score, as returned by `summary::score_students`.
pub fn build_report(
    scope_label: &str,
    generated_at: DateTime<Utc>,
    risks: &[StudentRisk],
    summary: &RiskSummary,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Student Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        scope_label,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Distribution");

    if summary.total_students == 0 {
        let _ = writeln!(output, "No students found for this scope.");
        return output;
    }

    let _ = writeln!(
        output,
        "- {} students, average score {:.1}, {:.1}% stable",
        summary.total_students, summary.average_score, summary.average_stability
    );
    let _ = writeln!(
        output,
        "- HIGH: {} | MEDIUM: {} | LOW: {}",
        summary.high_risk_count, summary.medium_risk_count, summary.low_risk_count
    );
    let _ = writeln!(
        output,
        "- {} classes, avg grade {}, attendance {}",
        summary.total_classes,
        format_optional(summary.average_grade, "/20"),
        format_optional(summary.average_attendance, "%"),
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Classes");
    for class in summary.class_analytics.iter() {
        let _ = writeln!(
            output,
            "- {}: {} students, avg risk {:.1}, HIGH {} / MEDIUM {} / LOW {}, avg grade {}, attendance {}",
            class.class_code,
            class.total_students,
            class.average_risk_score,
            class.high_risk_count,
            class.medium_risk_count,
            class.low_risk_count,
            format_optional(class.average_grade, "/20"),
            format_optional(class.average_attendance, "%"),
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");
    for student in risks.iter().take(TOP_STUDENTS) {
        let _ = writeln!(
            output,
            "- {} ({}, {}) score {:.1} [{}] across {} grades and {} sessions",
            student.profile.name,
            student.profile.email,
            student.profile.class_code,
            student.risk.score,
            student.risk.level,
            student.grade_count,
            student.attendance_count
        );
    }

    let flagged: Vec<&StudentRisk> = risks
        .iter()
        .filter(|student| student.risk.level == RiskLevel::High)
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Factor Breakdown (HIGH)");
    if flagged.is_empty() {
        let _ = writeln!(output, "No high-risk students in this scope.");
    } else {
        for student in flagged {
            let _ = writeln!(output, "### {}", student.profile.name);
            for factor in student.risk.factors.iter() {
                let _ = writeln!(
                    output,
                    "- {}: {:.1} (weight {:.2}, contributes {:.1}) {}",
                    factor.name, factor.value, factor.weight, factor.contribution, factor.description
                );
            }
            for recommendation in student.risk.recommendations.iter() {
                let _ = writeln!(output, "  - {}", recommendation);
            }
        }
    }

    output
}

/// Plain-text breakdown of one student's result for terminal output.
pub fn explain(student: &StudentRisk) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{} ({}, {}): score {:.1} [{}]",
        student.profile.name,
        student.profile.email,
        student.profile.class_code,
        student.risk.score,
        student.risk.level
    );
    for factor in student.risk.factors.iter() {
        let _ = writeln!(
            output,
            "  {:<18} value {:>6.1}  weight {:.2}  contribution {:>5.1}  {}",
            factor.name, factor.value, factor.weight, factor.contribution, factor.description
        );
    }
    let _ = writeln!(output, "Recommendations:");
    for recommendation in student.risk.recommendations.iter() {
        let _ = writeln!(output, "  - {}", recommendation);
    }
    output
}
