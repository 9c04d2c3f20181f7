use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_store::{EvidenceStore, HistoryQuery, NewEnrollment, NewSession, Store};
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance from lecture video", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from face photos
    Enroll {
        /// Student id (e.g. university id number)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Photo files, one face each
        #[arg(long = "photo", required = true)]
        photos: Vec<PathBuf>,
        /// Also add the student to this course
        #[arg(long)]
        course: Option<String>,
    },
    /// Check whether a student id or name is already enrolled
    Check {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },
    /// Inspect or remove enrolled students
    Students {
        #[command(subcommand)]
        command: StudentCommands,
    },
    /// Manage course membership
    Course {
        #[command(subcommand)]
        command: CourseCommands,
    },
    /// Take attendance from a video file or a directory of frames
    Process {
        /// Video file, image, or directory of frames
        input: PathBuf,
        #[arg(long)]
        course: String,
        #[arg(long)]
        teacher: Option<String>,
        /// Override the configured similarity threshold
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Show a processed session and its records
    Session {
        id: String,
    },
    /// List processed sessions, newest first
    History {
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        teacher: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show configuration and model availability
    Status,
}

#[derive(Subcommand)]
enum StudentCommands {
    /// List active students
    List {
        #[arg(long)]
        course: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show one student
    Show { id: String },
    /// Soft-delete a student's enrollment
    Remove { id: String },
}

#[derive(Subcommand)]
enum CourseCommands {
    /// Add students to a course
    Add {
        course: String,
        #[arg(required = true)]
        students: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll {
            id,
            name,
            photos,
            course,
        } => enroll(&config, id, name, photos, course).await,
        Commands::Check { id, name } => {
            let store = open_store(&config)?;
            print_json(&store.check_enrollment_exists(&id, &name)?)
        }
        Commands::Students { command } => students(&config, command),
        Commands::Course {
            command: CourseCommands::Add { course, students },
        } => {
            let mut store = open_store(&config)?;
            for student in &students {
                store
                    .add_course_member(&course, student)
                    .with_context(|| format!("adding {student} to {course}"))?;
            }
            let roster = store.roster_for_course(&course)?;
            print_json(&json!({ "course_id": course, "students": roster.len() }))
        }
        Commands::Process {
            input,
            course,
            teacher,
            threshold,
        } => process(&config, input, course, teacher, threshold).await,
        Commands::Session { id } => {
            let store = open_store(&config)?;
            let session = store
                .get_session(&id)?
                .with_context(|| format!("no session with id {id}"))?;
            let records = store.get_records(&id)?;
            print_json(&json!({ "session": session, "records": records }))
        }
        Commands::History {
            course,
            teacher,
            limit,
            offset,
        } => {
            let store = open_store(&config)?;
            let sessions = store.history(&HistoryQuery {
                course_id: course,
                teacher_id: teacher,
                limit,
                offset,
            })?;
            print_json(&sessions)
        }
        Commands::Status => status(&config),
    }
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path).with_context(|| format!("opening database {}", config.db_path.display()))
}

fn start_engine(config: &Config) -> Result<engine::EngineHandle> {
    let profile = config.recognizer_profile()?;
    let handle = engine::spawn_engine(
        &config.detector_model_path(),
        config.detector_confidence,
        &config.recognizer_model_path()?,
        profile,
    )
    .context("loading face models")?;
    Ok(handle)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn enroll(
    config: &Config,
    id: String,
    name: String,
    photo_paths: Vec<PathBuf>,
    course: Option<String>,
) -> Result<()> {
    let mut store = open_store(config)?;

    let check = store.check_enrollment_exists(&id, &name)?;
    if check.duplicate_id {
        bail!("student id {} is already enrolled", id.trim());
    }
    if check.duplicate_name {
        bail!("a student named {:?} is already enrolled", name.trim());
    }
    if photo_paths.len() < config.enrollment_photos {
        bail!(
            "need {} photos, got {}",
            config.enrollment_photos,
            photo_paths.len()
        );
    }

    let photos = photo_paths
        .iter()
        .map(|p| rollcall_media::load_image(p))
        .collect::<Result<Vec<_>, _>>()?;

    let engine = start_engine(config)?;
    let descriptors = engine
        .enroll(photos.clone(), config.quality_policy(), config.enrollment_photos)
        .await?;

    let evidence = EvidenceStore::new(&config.data_dir);
    let stored = evidence.save_enrollment_photos(id.trim(), &photos)?;

    let student = store.create_enrollment(&NewEnrollment {
        student_id: id,
        name,
        descriptors,
        photo_paths: stored.iter().map(|p| p.display().to_string()).collect(),
    })?;

    if let Some(course) = course {
        store.add_course_member(&course, &student.student_id)?;
    }

    print_json(&json!({
        "student": student,
        "descriptors": student.descriptor_count(),
    }))
}

fn students(config: &Config, command: StudentCommands) -> Result<()> {
    match command {
        StudentCommands::List { course, limit, offset } => {
            let store = open_store(config)?;
            let list = store.list_students(course.as_deref(), limit, offset)?;
            print_json(&list)
        }
        StudentCommands::Show { id } => {
            let store = open_store(config)?;
            let student = store
                .get_student(&id)?
                .with_context(|| format!("no student with id {id}"))?;
            print_json(&json!({
                "student": student,
                "descriptors": student.descriptor_count(),
            }))
        }
        StudentCommands::Remove { id } => {
            let mut store = open_store(config)?;
            if !store.delete_student(&id)? {
                bail!("no active student with id {id}");
            }
            print_json(&json!({ "student_id": id, "status": "deleted" }))
        }
    }
}

async fn process(
    config: &Config,
    input: PathBuf,
    course: String,
    teacher: Option<String>,
    threshold: Option<f32>,
) -> Result<()> {
    let threshold = config.effective_threshold(threshold).context("--threshold")?;
    let mut store = open_store(config)?;
    let roster = store.roster_for_course(&course)?;
    if roster.is_empty() {
        bail!("no students enrolled in course {course}; enroll students before taking attendance");
    }

    let source = rollcall_media::open_source(&input).with_context(|| format!("opening {}", input.display()))?;
    let engine = start_engine(config)?;

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<rollcall_core::Progress>();
    let reporter = tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            match p.fraction() {
                Some(f) => tracing::info!(frames = p.frames_done, percent = (f * 100.0).round(), "progress"),
                None => tracing::info!(frames = p.frames_done, "progress"),
            }
        }
    });

    let started = Instant::now();
    let run = engine.process(source, roster, threshold, progress_tx).await?;
    let elapsed = started.elapsed().as_secs_f64();
    let _ = reporter.await;

    let video_filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    let evidence = EvidenceStore::new(&config.data_dir);
    let session = store.save_attendance(
        &NewSession {
            course_id: course,
            teacher_id: teacher,
            video_filename,
            processing_seconds: elapsed,
        },
        &run.outcome,
        &evidence,
    )?;
    let records = store.get_records(&session.id)?;

    print_json(&json!({
        "session": session,
        "stats": run.stats,
        "records": records,
    }))
}

fn status(config: &Config) -> Result<()> {
    let detector = config.detector_model_path();
    let recognizer = config.recognizer_model_path()?;
    let profile = config.recognizer_profile()?;

    print_json(&json!({
        "version": env!("CARGO_PKG_VERSION"),
        "db_path": config.db_path,
        "data_dir": config.data_dir,
        "similarity_threshold": config.similarity_threshold,
        "detector_confidence": config.detector_confidence,
        "quality": config.quality_policy(),
        "enrollment_photos": config.enrollment_photos,
        "ffmpeg": cfg!(feature = "ffmpeg"),
        "models": {
            "detector": { "path": detector, "present": detector.exists() },
            "recognizer": {
                "profile": profile.name,
                "dim": profile.dim,
                "path": recognizer,
                "present": recognizer.exists(),
            },
        },
    }))
}
