use std::path::PathBuf;

use clap::{Parser, Subcommand};
use course_core::config::Config;
use course_core::course::{
    progress, sequencer,
    store::{self, MediaStore, NewCourse},
};
use course_core::db;
use course_core::utils::{init_log, now_utc};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file supplying the values below.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the database file; DATABASE_URL overrides this.
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Root directory of uploaded resource files.
    #[arg(short, long)]
    media_root: Option<PathBuf>,

    /// Log directory; logs to stdout when omitted.
    #[arg(short, long)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a course.
    AddCourse {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a course with its lessons, resources and progress records.
    RemoveCourse { course_id: i64 },
    /// List courses a learner can currently see.
    Courses {
        /// Include hidden and out-of-window courses.
        #[arg(long)]
        all: bool,
    },
    /// Insert a lesson at the given position (clamped into the valid range).
    AddLesson {
        course_id: i64,
        title: String,
        #[arg(long, default_value = "1")]
        order: String,
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete a lesson; later lessons move up to close the gap.
    RemoveLesson { lesson_id: i64 },
    /// List a course's lessons in order.
    Lessons { course_id: i64 },
    /// Enroll a user in a course.
    Enroll { user_id: i64, course_id: i64 },
    /// Mark a lesson complete (or incomplete with --undo) for a user.
    Complete {
        user_id: i64,
        lesson_id: i64,
        #[arg(long)]
        undo: bool,
    },
    /// Show a user's stored completion percentage for a course.
    Progress { user_id: i64, course_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let _guard = init_log(args.log.clone().or(config.log_dir.clone()));
    let _ = dotenvy::dotenv();

    let database_path = match dotenvy::var("DATABASE_URL") {
        Ok(url) => PathBuf::from(url.trim_start_matches("sqlite://")),
        Err(_) => args.database.clone().unwrap_or(config.database.clone()),
    };
    let database = db::connect(&database_path).await?;
    let media = MediaStore::new(args.media_root.clone().unwrap_or(config.media_root.clone()));

    match args.command {
        Command::AddCourse { title, description } => {
            let course = store::create_course(&database, NewCourse { title, description }).await?;
            println!("{}", serde_json::to_string_pretty(&course)?);
        }
        Command::RemoveCourse { course_id } => {
            store::delete_course(&database, course_id, &media).await?;
            println!("removed course {course_id}");
        }
        Command::Courses { all } => {
            let courses = if all {
                store::list_courses(&database).await?
            } else {
                store::available_courses(&database, now_utc()).await?
            };
            println!("{}", serde_json::to_string_pretty(&courses)?);
        }
        Command::AddLesson {
            course_id,
            title,
            order,
            content,
        } => {
            let order = sequencer::parse_requested_order(&order)?;
            let lesson = sequencer::insert_lesson(
                &database,
                course_id,
                order,
                sequencer::NewLesson { title, content },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&lesson)?);
        }
        Command::RemoveLesson { lesson_id } => {
            sequencer::delete_lesson(&database, lesson_id, &media).await?;
            println!("removed lesson {lesson_id}");
        }
        Command::Lessons { course_id } => {
            let lessons = sequencer::list_lessons(&database, course_id).await?;
            println!("{}", serde_json::to_string_pretty(&lessons)?);
        }
        Command::Enroll { user_id, course_id } => {
            store::enroll(&database, user_id, course_id).await?;
            println!("enrolled user {user_id} in course {course_id}");
        }
        Command::Complete {
            user_id,
            lesson_id,
            undo,
        } => {
            let pct = progress::set_lesson_completed(&database, user_id, lesson_id, !undo).await?;
            println!("{pct:.1}%");
        }
        Command::Progress { user_id, course_id } => {
            let pct = progress::course_progress(&database, user_id, course_id).await?;
            println!("{pct:.1}%");
        }
    }
    Ok(())
}
