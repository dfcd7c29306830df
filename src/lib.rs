//! Rule-based academic risk scoring over student grades and attendance.

pub mod config;
pub mod db;
pub mod ingest;
pub mod models;
pub mod report;
pub mod risk;
pub mod summary;

pub use config::EngineConfig;
pub use models::{AttendanceRecord, GradeRecord, RiskFactor, RiskLevel, RiskResult};
pub use risk::{compute_risk, RiskEngine};
