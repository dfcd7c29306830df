use crate::config::{EngineConfig, Thresholds};
use crate::models::{AttendanceRecord, GradeRecord, RiskFactor, RiskLevel, RiskResult};

pub const GRADE_AVERAGE: &str = "Grade Average";
pub const ATTENDANCE: &str = "Attendance";
pub const GRADE_CONSISTENCY: &str = "Grade Consistency";
pub const RECENT_TREND: &str = "Recent Trend";

pub const REC_ADVISOR_MEETING: &str =
    "Schedule a meeting with academic advisor to discuss study strategies";
pub const REC_STUDY_GROUPS: &str = "Consider forming study groups with classmates";
pub const REC_TUTORING: &str =
    "Explore tutoring resources available at the academic support center";
pub const REC_ATTENDANCE: &str =
    "Improve class attendance - each session contains important material";
pub const REC_SCHEDULE_REMINDERS: &str = "Set up reminders for class schedules";
pub const REC_CONSISTENT_PREPARATION: &str =
    "Focus on consistent preparation across all assessments";
pub const REC_BALANCED_SCHEDULE: &str =
    "Review study schedule to ensure balanced preparation";
pub const REC_ADDRESS_DECLINE: &str = "Address recent performance decline immediately";
pub const REC_UNDERLYING_CAUSES: &str =
    "Identify and address any personal or academic challenges";
pub const REC_URGENT_ADVISOR: &str = "URGENT: Schedule immediate meeting with academic advisor";
pub const REC_REDUCED_LOAD: &str = "Consider reduced course load or academic support programs";
pub const REC_CHECK_INS: &str = "Regular check-ins with academic advisor recommended";
pub const REC_CONTINUE: &str = "Continue current academic performance.";

const VOLATILITY_CAP: f64 = 100.0;
const VOLATILITY_SCALE: f64 = 10.0;
const MIN_GRADES_FOR_VOLATILITY: usize = 2;
const MIN_GRADES_FOR_TREND: usize = 3;
const DEFAULT_TREND_RISK: f64 = 30.0;

/// Rule-based academic risk scorer.
///
/// Holds only an immutable configuration, so one engine can be shared across
/// threads and scoring a student never depends on earlier calls.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: EngineConfig,
}

impl RiskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compute_risk(
        &self,
        grades: &[GradeRecord],
        attendance: &[AttendanceRecord],
    ) -> RiskResult {
        let config = &self.config;
        let series = chronological_grades(grades);

        let average = grade_average(&series).unwrap_or(config.default_grade_average);
        let rate = attendance_rate(attendance).unwrap_or(config.default_attendance_rate);
        let volatility = volatility(&series);
        let trend = trend_risk(&series);

        let factors = vec![
            RiskFactor {
                name: GRADE_AVERAGE.to_string(),
                value: average,
                weight: config.weights.grade_average,
                contribution: piecewise_subscore(average, config.grade_thresholds)
                    * config.weights.grade_average,
                description: grade_description(average, config.grade_thresholds).to_string(),
            },
            RiskFactor {
                name: ATTENDANCE.to_string(),
                value: rate,
                weight: config.weights.attendance_rate,
                contribution: piecewise_subscore(rate, config.attendance_thresholds)
                    * config.weights.attendance_rate,
                description: attendance_description(rate, config.attendance_thresholds)
                    .to_string(),
            },
            RiskFactor {
                name: GRADE_CONSISTENCY.to_string(),
                value: 100.0 - volatility,
                weight: config.weights.grade_volatility,
                contribution: volatility * config.weights.grade_volatility,
                description: consistency_description(volatility).to_string(),
            },
            RiskFactor {
                name: RECENT_TREND.to_string(),
                value: 100.0 - trend,
                weight: config.weights.recent_trend,
                contribution: trend * config.weights.recent_trend,
                description: trend_description(trend).to_string(),
            },
        ];

        let total: f64 = factors.iter().map(|factor| factor.contribution).sum();
        let score = round_one_decimal(total.clamp(0.0, 100.0));
        let level = self.classify(score);
        let recommendations = self.recommendations(&factors, average, level);

        RiskResult {
            score,
            level,
            factors,
            recommendations,
        }
    }

    /// Boundary scores belong to the lower band.
    pub fn classify(&self, score: f64) -> RiskLevel {
        let levels = self.config.levels;
        match score {
            s if s <= levels.low_max => RiskLevel::Low,
            s if s <= levels.medium_max => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }

    /// `factors` must be in the order produced by `compute_risk`.
    fn recommendations(&self, factors: &[RiskFactor], average: f64, level: RiskLevel) -> Vec<String> {
        let triggers = self.config.triggers;
        let contribution = |index: usize| factors.get(index).map_or(0.0, |f| f.contribution);
        let mut recommendations: Vec<&'static str> = Vec::new();

        if contribution(0) > triggers.grade_average {
            recommendations.push(REC_ADVISOR_MEETING);
            recommendations.push(REC_STUDY_GROUPS);
            if average < triggers.tutoring_average {
                recommendations.push(REC_TUTORING);
            }
        }

        if contribution(1) > triggers.attendance_rate {
            recommendations.push(REC_ATTENDANCE);
            recommendations.push(REC_SCHEDULE_REMINDERS);
        }

        if contribution(2) > triggers.grade_volatility {
            recommendations.push(REC_CONSISTENT_PREPARATION);
            recommendations.push(REC_BALANCED_SCHEDULE);
        }

        if contribution(3) > triggers.recent_trend {
            recommendations.push(REC_ADDRESS_DECLINE);
            recommendations.push(REC_UNDERLYING_CAUSES);
        }

        match level {
            RiskLevel::High => {
                recommendations.insert(0, REC_URGENT_ADVISOR);
                recommendations.push(REC_REDUCED_LOAD);
            }
            RiskLevel::Medium => recommendations.push(REC_CHECK_INS),
            RiskLevel::Low => {}
        }

        if recommendations.is_empty() {
            recommendations.push(REC_CONTINUE);
        }

        recommendations.into_iter().map(str::to_string).collect()
    }
}

/// Scores one student with the built-in weights and thresholds.
pub fn compute_risk(grades: &[GradeRecord], attendance: &[AttendanceRecord]) -> RiskResult {
    RiskEngine::new().compute_risk(grades, attendance)
}

/// Normalized grades in ascending date order. Same-date grades are ordered by
/// value so the series does not depend on input order.
pub fn chronological_grades(grades: &[GradeRecord]) -> Vec<f64> {
    let mut dated: Vec<_> = grades
        .iter()
        .map(|grade| (grade.date, grade.normalized()))
        .collect();
    dated.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)));
    dated.into_iter().map(|(_, value)| value).collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean of the normalized series, `None` when there are no grades.
pub fn grade_average(series: &[f64]) -> Option<f64> {
    mean(series)
}

/// Percentage of sessions attended, `None` when there are no records.
pub fn attendance_rate(attendance: &[AttendanceRecord]) -> Option<f64> {
    if attendance.is_empty() {
        return None;
    }
    let attended = attendance
        .iter()
        .filter(|record| record.status.is_attended())
        .count();
    Some(attended as f64 / attendance.len() as f64 * 100.0)
}

/// Maps a metric where higher is better onto a 0-100 risk subscore. The
/// lowest band is unbounded; only the total score is clamped.
pub fn piecewise_subscore(value: f64, thresholds: impl Into<Thresholds>) -> f64 {
    let thresholds = thresholds.into();
    if value >= thresholds.low {
        (30.0 - (value - thresholds.low)).max(0.0)
    } else if value >= thresholds.medium {
        30.0 + (thresholds.low - value) * 2.0
    } else {
        60.0 + (thresholds.medium - value) * 1.5
    }
}

/// Population standard deviation scaled into 0-100.
pub fn volatility(series: &[f64]) -> f64 {
    if series.len() < MIN_GRADES_FOR_VOLATILITY {
        return 0.0;
    }
    let Some(mean) = mean(series) else {
        return 0.0;
    };
    let variance = series
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / series.len() as f64;
    (variance.sqrt() * VOLATILITY_SCALE).min(VOLATILITY_CAP)
}

/// Compares the earlier half of a chronological series with the later half.
pub fn trend_risk(series: &[f64]) -> f64 {
    if series.len() < MIN_GRADES_FOR_TREND {
        return DEFAULT_TREND_RISK;
    }
    let (first, second) = series.split_at(series.len() / 2);
    let (Some(first_avg), Some(second_avg)) = (mean(first), mean(second)) else {
        return DEFAULT_TREND_RISK;
    };

    match first_avg - second_avg {
        diff if diff > 2.0 => 70.0,
        diff if diff > 0.5 => 50.0,
        diff if diff > -0.5 => 30.0,
        _ => 10.0,
    }
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn grade_description(average: f64, thresholds: impl Into<Thresholds>) -> &'static str {
    let thresholds = thresholds.into();
    if average >= thresholds.low {
        "Good academic performance"
    } else if average >= thresholds.medium {
        "Average academic performance"
    } else {
        "Below average academic performance"
    }
}

fn attendance_description(rate: f64, thresholds: impl Into<Thresholds>) -> &'static str {
    let thresholds = thresholds.into();
    if rate >= thresholds.low {
        "Excellent attendance"
    } else if rate >= thresholds.medium {
        "Acceptable attendance"
    } else {
        "Poor attendance requires attention"
    }
}

fn consistency_description(volatility: f64) -> &'static str {
    match volatility {
        v if v < 20.0 => "Consistent performance across subjects",
        v if v < 40.0 => "Some variation in performance",
        _ => "Inconsistent performance needs attention",
    }
}

fn trend_description(trend: f64) -> &'static str {
    match trend {
        t if t < 30.0 => "Performance is improving",
        t if t < 50.0 => "Stable performance",
        t if t < 70.0 => "Slight decline in recent performance",
        _ => "Significant decline in recent performance",
    }
}
