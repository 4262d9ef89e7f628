mod config;
mod render;
mod replay;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use config::Config;
use replay::ReplayFeed;
use rollcall_core::{enroll_and_save, AttendanceStore, Session, SystemClock};
use rollcall_store::{NewStudent, ReportFilter, SqliteStore, StudentUpdate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face-recognition attendance")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the student roster
    Student {
        #[command(subcommand)]
        action: StudentCommand,
    },
    /// Capture a face embedding for a student from recorded encoder output
    Enroll {
        /// Student ID to enroll
        id: String,
        /// JSON-Lines file of encoder frames
        #[arg(long)]
        samples: PathBuf,
    },
    /// Run an attendance session until the feed ends or Ctrl-C
    Run {
        /// JSON-Lines file of encoder frames
        #[arg(long)]
        replay: PathBuf,
    },
    /// Show today's attendance log
    Today {
        #[arg(long)]
        json: bool,
    },
    /// Attendance report with optional filters
    Report {
        /// Substring of the student's name
        #[arg(long)]
        name: Option<String>,
        /// Substring of the department
        #[arg(long)]
        department: Option<String>,
        /// Exact date, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show database and configuration status
    Status,
}

#[derive(Subcommand)]
enum StudentCommand {
    /// Register a new student
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        department: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Change a student's details
    Update {
        id: String,
        #[arg(long)]
        new_id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Remove a student and their attendance history
    Remove { id: String },
    /// List registered students
    List {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open {}", config.db_path.display()))?,
    );

    match cli.command {
        Commands::Student { action } => student(&store, action)?,
        Commands::Enroll { id, samples } => enroll_student(&store, &config, &id, &samples)?,
        Commands::Run { replay } => run_session(store, &config, &replay).await?,
        Commands::Today { json } => {
            let rows = store.attendance_log(Local::now().date_naive())?;
            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No attendance recorded today");
            } else {
                println!("{}", render::attendance(&rows));
            }
        }
        Commands::Report {
            name,
            department,
            date,
            json,
        } => {
            let rows = store.report(&ReportFilter {
                name,
                department,
                date,
            })?;
            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No matching attendance records");
            } else {
                println!("{}", render::attendance(&rows));
            }
        }
        Commands::Status => status(&store, &config)?,
    }

    Ok(())
}

fn student(store: &SqliteStore, action: StudentCommand) -> Result<()> {
    match action {
        StudentCommand::Add {
            id,
            name,
            department,
            email,
        } => {
            store.add_student(&NewStudent {
                student_id: id.clone(),
                name,
                department,
                email,
            })?;
            println!("Added student {}", id.trim());
        }
        StudentCommand::Update {
            id,
            new_id,
            name,
            department,
            email,
        } => {
            store.update_student(
                &id,
                &StudentUpdate {
                    student_id: new_id,
                    name,
                    department,
                    email,
                },
            )?;
            println!("Updated student {id}");
        }
        StudentCommand::Remove { id } => {
            store.remove_student(&id)?;
            println!("Removed student {id}");
        }
        StudentCommand::List { json } => {
            let students = store.list_students()?;
            if json {
                print_json(&students)?;
            } else if students.is_empty() {
                println!("No students registered");
            } else {
                println!("{}", render::students(&students));
            }
        }
    }
    Ok(())
}

fn enroll_student(store: &SqliteStore, config: &Config, id: &str, samples: &Path) -> Result<()> {
    let mut feed = ReplayFeed::open(samples)
        .with_context(|| format!("failed to open {}", samples.display()))?;
    let result = enroll_and_save(store, &mut feed, id, &config.enroll_config())?;
    println!(
        "Enrolled {} from {} samples",
        result.identity, result.samples_used
    );
    Ok(())
}

async fn run_session(store: Arc<SqliteStore>, config: &Config, replay: &Path) -> Result<()> {
    let session = Session::open(store, Arc::new(SystemClock), config.session_config())?;
    let feed = ReplayFeed::open(replay)
        .with_context(|| format!("failed to open {}", replay.display()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(feed), tx)?;

    let mut stopping = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => println!("{}", render::event(&event)),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                tracing::info!(session = %handle.id(), "interrupt received, stopping");
                handle.request_stop();
                stopping = true;
            }
        }
    }

    tokio::task::spawn_blocking(move || handle.wait()).await??;
    Ok(())
}

#[derive(Serialize)]
struct Status<'a> {
    database: &'a Path,
    schema_version: i64,
    students: usize,
    enrolled: usize,
    marked_today: usize,
    tolerance: f32,
    embedding_dim: usize,
}

fn status(store: &SqliteStore, config: &Config) -> Result<()> {
    let students = store.list_students()?;
    let status = Status {
        database: &config.db_path,
        schema_version: store.schema_version()?,
        students: students.len(),
        enrolled: students.iter().filter(|s| s.enrolled).count(),
        marked_today: store.marks_for_date(Local::now().date_naive())?.len(),
        tolerance: config.tolerance,
        embedding_dim: config.embedding_dim,
    };
    print_json(&status)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::SessionError;

    #[tokio::test]
    async fn test_empty_gallery_refused_before_feed_is_opened() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let missing = Path::new("/nonexistent/rollcall/feed.jsonl");

        let err = run_session(store, &Config::default(), missing)
            .await
            .unwrap_err();
        assert!(
            matches!(err.downcast_ref::<SessionError>(), Some(SessionError::EmptyGallery)),
            "{err:#}"
        );
    }

    #[test]
    fn test_enroll_rejects_samples_of_wrong_width() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add_student(&NewStudent {
                student_id: "S1".into(),
                name: "Alice".into(),
                department: String::new(),
                email: String::new(),
            })
            .unwrap();
        let mut samples = tempfile::NamedTempFile::new().unwrap();
        for _ in 0..5 {
            std::io::Write::write_all(&mut samples, b"{\"faces\":[{\"embedding\":[0.5,0.5]}]}\n")
                .unwrap();
        }
        let config = Config {
            embedding_dim: 3,
            ..Config::default()
        };

        assert!(enroll_student(&store, &config, "S1", samples.path()).is_err());
        assert!(!store.student("S1").unwrap().unwrap().enrolled);

        let config = Config {
            embedding_dim: 2,
            ..Config::default()
        };
        enroll_student(&store, &config, "S1", samples.path()).unwrap();
        assert!(store.student("S1").unwrap().unwrap().enrolled);
    }
}
