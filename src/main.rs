use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod db;
mod directory;
mod error;
mod ingest;
mod manager;
mod models;
mod ranking;
mod report;
mod store;

use db::PgGradeStore;
use directory::Directory;
use ingest::{read_semester_rows, CsvSheets, Workbook};
use manager::QueryManager;
use models::InsertReport;
use report::ReportScope;
use store::GradeStore;

#[derive(Parser)]
#[command(name = "semester-grades")]
#[command(about = "Load semester grade sheets and rank students by department", long_about = None)]
struct Cli {
    /// Schema holding the grade tables
    #[arg(long, global = true, default_value = "test_keyspace")]
    keyspace: String,
    /// Metadata document with departments, semesters and students
    #[arg(long, global = true, default_value = "./data.json")]
    metadata: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the keyspace schema and both grade tables
    InitDb,
    /// Load one sheet per semester into the store
    #[command(group(
        ArgGroup::new("source")
            .args(["workbook", "csv_dir"])
            .required(true)
    ))]
    Load {
        #[arg(long)]
        workbook: Option<PathBuf>,
        #[arg(long)]
        csv_dir: Option<PathBuf>,
        /// Write per-student documents instead of per-semester rows
        #[arg(long)]
        consolidated: bool,
    },
    /// Rank a department for one semester, or across all semesters
    #[command(group(
        ArgGroup::new("department")
            .args(["dep_code", "dep_name"])
            .required(true)
    ))]
    Select {
        #[arg(long)]
        dep_code: Option<String>,
        #[arg(long)]
        dep_name: Option<String>,
        #[arg(long)]
        semester: Option<String>,
        /// Write a markdown report instead of printing a table
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Look up one student's grade for one semester
    Grade {
        #[arg(long)]
        dep_code: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        student_id: String,
    },
    /// Remove every row from the per-semester table
    Truncate,
    /// Copy student names from the metadata document into stored rows
    Rename,
    /// Build the student directory from raw enrollment text
    ParseDirectory {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

impl Commands {
    /// Schema setup is the only command that never reads the metadata document.
    fn uses_directory(&self) -> bool {
        !matches!(self, Commands::InitDb)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("semester_grades=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    if !cli.command.uses_directory() {
        let store = connect_store(&cli.keyspace).await?;
        store.init_schema().await?;
        store.close().await;
        println!("Schema ready.");
        return Ok(());
    }

    let mut directory = Directory::load(&cli.metadata)
        .with_context(|| format!("failed to load {}", cli.metadata.display()))?;

    if let Commands::ParseDirectory { out } = &cli.command {
        let report = directory.parse_and_persist(out.as_deref())?;
        println!(
            "Parsed {} students ({} skipped).",
            report.parsed,
            report.failures.len()
        );
        return Ok(());
    }

    let store = connect_store(&cli.keyspace).await?;
    let mut qm = QueryManager::new(store, directory);
    let outcome = run(&qm, cli.command).await;
    qm.close().await;
    outcome
}

async fn connect_store(keyspace: &str) -> anyhow::Result<PgGradeStore> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the grade store's Postgres instance")?;
    PgGradeStore::connect(&database_url, keyspace)
        .await
        .context("failed to connect to the grade store")
}

async fn run(qm: &QueryManager<PgGradeStore>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::InitDb | Commands::ParseDirectory { .. } => {}
        Commands::Load {
            workbook,
            csv_dir,
            consolidated,
        } => {
            let semesters = qm.directory().semesters();
            let rows = match (workbook, csv_dir) {
                (Some(path), _) => {
                    let mut source = Workbook::open(&path)
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    read_semester_rows(&mut source, semesters)?
                }
                (None, Some(dir)) => read_semester_rows(&mut CsvSheets::new(dir), semesters)?,
                (None, None) => anyhow::bail!("either --workbook or --csv-dir is required"),
            };

            let report = if consolidated {
                qm.insert_consolidated(&rows).await?
            } else {
                qm.insert_flat(&rows).await?
            };
            print_insert_report(&report, consolidated);
        }
        Commands::Select {
            dep_code,
            dep_name,
            semester,
            out,
        } => {
            let dep_code = match (dep_code, dep_name) {
                (Some(code), _) => code,
                (None, Some(name)) => qm
                    .directory()
                    .department_code(&name)
                    .map(str::to_string)
                    .with_context(|| format!("unknown department {name:?}"))?,
                (None, None) => anyhow::bail!("either --dep-code or --dep-name is required"),
            };
            let scope = ReportScope {
                dep_code: &dep_code,
                dep_name: qm.directory().department_name(&dep_code),
                semester: semester.as_deref(),
            };
            let generated_at = chrono::Utc::now();

            let (table, markdown, count) = match semester.as_deref() {
                Some(semester) => {
                    let grades = qm.select_semester(&dep_code, semester).await?;
                    (
                        report::semester_table(&scope, &grades),
                        report::build_semester_report(&scope, generated_at, &grades),
                        grades.len(),
                    )
                }
                None => {
                    let grades = qm.select_department(&dep_code).await?;
                    (
                        report::department_table(&scope, &grades),
                        report::build_department_report(&scope, generated_at, &grades),
                        grades.len(),
                    )
                }
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, markdown)?;
                    println!("Report with {count} grades written to {}.", path.display());
                }
                None if count == 0 => println!("No grades found."),
                None => print!("{table}"),
            }
        }
        Commands::Grade {
            dep_code,
            semester,
            student_id,
        } => match qm.student_grade(&dep_code, &semester, &student_id).await? {
            Some(grade) => println!("{student_id} {semester} {grade:.2}"),
            None => println!("No grade for {student_id} in {semester}."),
        },
        Commands::Truncate => {
            qm.truncate().await?;
            println!("Grade table truncated.");
        }
        Commands::Rename => {
            let report = qm.rename_students().await?;
            println!(
                "Issued {} name updates, {} rows matched.",
                report.statements, report.rows_matched
            );
            for failure in &report.failures {
                println!("- failed {} ({:?}): {}", failure.key, failure.kind, failure.message);
            }
        }
    }

    Ok(())
}

fn print_insert_report(report: &InsertReport, consolidated: bool) {
    let unit = if consolidated { "students" } else { "rows" };
    println!(
        "Inserted {} of {} {unit} in {:.2?}.",
        report.inserted, report.attempted, report.elapsed
    );
    for failure in &report.failures {
        println!("- skipped {} ({:?}): {}", failure.key, failure.kind, failure.message);
    }
}
