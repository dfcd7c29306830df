use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::GRADE_SCALE;

const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("factor weights must sum to 1.0, got {0}")]
    WeightSum(f64),
    #[error("weight for {0} must be within 0.0..=1.0")]
    WeightRange(&'static str),
    #[error("{0} thresholds must satisfy low >= medium")]
    InvertedThresholds(&'static str),
    #[error("risk level bounds must satisfy 0 <= low_max <= medium_max <= 100")]
    InvertedLevels,
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),
    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub grade_average: f64,
    pub attendance_rate: f64,
    pub grade_volatility: f64,
    pub recent_trend: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            grade_average: 0.30,
            attendance_rate: 0.25,
            grade_volatility: 0.20,
            recent_trend: 0.25,
        }
    }
}

impl FactorWeights {
    pub fn total(&self) -> f64 {
        self.grade_average + self.attendance_rate + self.grade_volatility + self.recent_trend
    }
}

/// Breakpoints of the piecewise-linear subscore, on the factor's own scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub medium: f64,
}

/// Breakpoints for the 0-20 grade average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeThresholds {
    pub low: f64,
    pub medium: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            low: 12.0,
            medium: 10.0,
        }
    }
}

impl From<GradeThresholds> for Thresholds {
    fn from(value: GradeThresholds) -> Self {
        Thresholds {
            low: value.low,
            medium: value.medium,
        }
    }
}

/// Breakpoints for the attendance percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceThresholds {
    pub low: f64,
    pub medium: f64,
}

impl Default for AttendanceThresholds {
    fn default() -> Self {
        Self {
            low: 90.0,
            medium: 75.0,
        }
    }
}

impl From<AttendanceThresholds> for Thresholds {
    fn from(value: AttendanceThresholds) -> Self {
        Thresholds {
            low: value.low,
            medium: value.medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelBounds {
    /// Scores at or below this are LOW.
    pub low_max: f64,
    /// Scores at or below this (and above `low_max`) are MEDIUM.
    pub medium_max: f64,
}

impl Default for LevelBounds {
    fn default() -> Self {
        Self {
            low_max: 30.0,
            medium_max: 60.0,
        }
    }
}

/// Contribution a factor must exceed before its recommendations fire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationTriggers {
    pub grade_average: f64,
    pub attendance_rate: f64,
    pub grade_volatility: f64,
    pub recent_trend: f64,
    /// Raw 0-20 average below which tutoring is suggested.
    pub tutoring_average: f64,
}

impl Default for RecommendationTriggers {
    fn default() -> Self {
        Self {
            grade_average: 20.0,
            attendance_rate: 15.0,
            grade_volatility: 15.0,
            recent_trend: 15.0,
            tutoring_average: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: FactorWeights,
    pub grade_thresholds: GradeThresholds,
    pub attendance_thresholds: AttendanceThresholds,
    pub levels: LevelBounds,
    pub triggers: RecommendationTriggers,
    /// Average assumed for a student without grades.
    pub default_grade_average: f64,
    /// Attendance percentage assumed for a student without attendance records.
    pub default_attendance_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            grade_thresholds: GradeThresholds::default(),
            attendance_thresholds: AttendanceThresholds::default(),
            levels: LevelBounds::default(),
            triggers: RecommendationTriggers::default(),
            default_grade_average: 10.0,
            default_attendance_rate: 90.0,
        }
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NotFinite(name));
    }
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange {
            name,
            min,
            max,
            value,
        });
    }
    Ok(())
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            ("grade_average", self.weights.grade_average),
            ("attendance_rate", self.weights.attendance_rate),
            ("grade_volatility", self.weights.grade_volatility),
            ("recent_trend", self.weights.recent_trend),
        ];
        for (name, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::WeightRange(name));
            }
        }

        let total = self.weights.total();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightSum(total));
        }

        let finite = [
            ("grade_thresholds.low", self.grade_thresholds.low),
            ("grade_thresholds.medium", self.grade_thresholds.medium),
            ("attendance_thresholds.low", self.attendance_thresholds.low),
            ("attendance_thresholds.medium", self.attendance_thresholds.medium),
            ("levels.low_max", self.levels.low_max),
            ("levels.medium_max", self.levels.medium_max),
            ("triggers.grade_average", self.triggers.grade_average),
            ("triggers.attendance_rate", self.triggers.attendance_rate),
            ("triggers.grade_volatility", self.triggers.grade_volatility),
            ("triggers.recent_trend", self.triggers.recent_trend),
            ("triggers.tutoring_average", self.triggers.tutoring_average),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite(name));
            }
        }

        if self.grade_thresholds.low < self.grade_thresholds.medium {
            return Err(ConfigError::InvertedThresholds("grade"));
        }
        if self.attendance_thresholds.low < self.attendance_thresholds.medium {
            return Err(ConfigError::InvertedThresholds("attendance"));
        }

        let levels = self.levels;
        if !(0.0 <= levels.low_max && levels.low_max <= levels.medium_max && levels.medium_max <= 100.0)
        {
            return Err(ConfigError::InvertedLevels);
        }

        check_range("default_grade_average", self.default_grade_average, 0.0, GRADE_SCALE)?;
        check_range("default_attendance_rate", self.default_attendance_rate, 0.0, 100.0)?;

        Ok(())
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Loads `path` when given, otherwise the built-in weights and thresholds.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
