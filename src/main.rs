use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use student_risk_engine::db::{self, StudentScope};
use student_risk_engine::models::StudentRecords;
use student_risk_engine::{ingest, report, summary, EngineConfig, RiskEngine};

#[derive(Parser)]
#[command(name = "student-risk")]
#[command(about = "Deterministic academic risk scoring from grades and attendance", long_about = None)]
struct Cli {
    /// TOML file overriding the default weights and thresholds
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Restrict to one class code
    #[arg(long, conflicts_with = "email")]
    class: Option<String>,
    /// Restrict to one student
    #[arg(long)]
    email: Option<String>,
    /// Read grades from a CSV export instead of Postgres
    #[arg(long)]
    grades: Option<PathBuf>,
    /// Attendance CSV export, used together with --grades
    #[arg(long, requires = "grades")]
    attendance: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grades and attendance from CSV files
    Import {
        #[arg(long)]
        grades: PathBuf,
        #[arg(long)]
        attendance: Option<PathBuf>,
    },
    /// Score risk across students
    Score {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = "risk-report.md")]
        out: PathBuf,
    },
    /// Print dashboard summary figures as JSON
    Summary {
        #[command(flatten)]
        source: SourceArgs,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn in_scope(student: &StudentRecords, scope: &StudentScope) -> bool {
    match scope {
        StudentScope::All => true,
        StudentScope::Class(code) => student.profile.class_code == *code,
        StudentScope::Email(email) => student.profile.email == *email,
    }
}

async fn load_students(source: &SourceArgs) -> anyhow::Result<(StudentScope, Vec<StudentRecords>)> {
    let scope = StudentScope::from_args(source.class.as_deref(), source.email.as_deref());

    let students: Vec<StudentRecords> = match &source.grades {
        Some(grades) => ingest::load_csv_files(grades, source.attendance.as_deref())?
            .into_iter()
            .filter(|student| in_scope(student, &scope))
            .collect(),
        None => {
            let pool = connect().await?;
            db::fetch_students(&pool, &scope).await?
        }
    };

    if let StudentScope::Email(email) = &scope {
        if students.is_empty() {
            anyhow::bail!("student {email} not found");
        }
    }

    tracing::info!(scope = %scope.label(), students = students.len(), "loaded students");
    Ok((scope, students))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(cli.config.as_deref())?;
    let engine = RiskEngine::with_config(config);

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { grades, attendance } => {
            let pool = connect().await?;
            let stats = db::import_csv(&pool, &grades, attendance.as_deref()).await?;
            println!(
                "Imported {} grades and {} attendance records for {} students.",
                stats.grades, stats.attendance, stats.students
            );
        }
        Commands::Score {
            source,
            limit,
            json,
        } => {
            let (scope, students) = load_students(&source).await?;
            let scores = summary::score_students(&engine, &students);

            if json {
                println!("{}", serde_json::to_string_pretty(&scores)?);
                return Ok(());
            }

            if scores.is_empty() {
                println!("No students found for {}.", scope.label());
                return Ok(());
            }

            if let StudentScope::Email(_) = scope {
                for student in scores.iter() {
                    print!("{}", report::explain(student));
                }
                return Ok(());
            }

            println!("Top students by risk score:");
            for student in scores.iter().take(limit) {
                println!(
                    "- {} ({}, {}) score {:.1} [{}]",
                    student.profile.name,
                    student.profile.email,
                    student.profile.class_code,
                    student.risk.score,
                    student.risk.level
                );
            }
        }
        Commands::Report { source, out } => {
            let (scope, students) = load_students(&source).await?;
            let scores = summary::score_students(&engine, &students);
            let totals = summary::summarize(&students, &scores);
            let report = report::build_report(&scope.label(), chrono::Utc::now(), &scores, &totals);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Summary { source } => {
            let (_, students) = load_students(&source).await?;
            let scores = summary::score_students(&engine, &students);
            let totals = summary::summarize(&students, &scores);
            println!("{}", serde_json::to_string_pretty(&totals)?);
        }
    }

    Ok(())
}
