use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::{Error, Result, map_unique};
use crate::utils::now_utc;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub is_visible: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub visible_from: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub visible_until: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCourse {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LessonResource {
    pub id: i64,
    pub lesson_id: i64,
    pub title: String,
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

/// Cleanup collaborator for files owned by lesson resources. The store only
/// tracks paths; removing the bytes is the caller's concern, supplied here as
/// an explicit contract instead of a framework-level cascade.
pub trait ResourceCleanup: Send + Sync {
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Removes resource files below a media root. Missing files are not an
/// error, the row may outlive the file.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceCleanup for MediaStore {
    fn remove(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_file(self.root.join(path)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// For callers whose resources hold no files.
pub struct NoCleanup;

impl ResourceCleanup for NoCleanup {
    fn remove(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn run_cleanup(cleanup: &dyn ResourceCleanup, path: &str) {
    if let Err(e) = cleanup.remove(Path::new(path)) {
        warn!("failed to remove resource file {}: {}", path, e);
    }
}

pub async fn create_course(database: &SqlitePool, course: NewCourse) -> Result<Course> {
    if course.title.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "course title must not be empty".to_string(),
        ));
    }
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO course (title, description, is_visible, created_at) VALUES (?, ?, 1, ?)",
    )
    .bind(&course.title)
    .bind(&course.description)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!(course_id = id, title = %course.title, "created course");
    get_course(database, id).await
}

pub async fn get_course(database: &SqlitePool, course_id: i64) -> Result<Course> {
    sqlx::query_as::<_, Course>("SELECT * FROM course WHERE id = ?")
        .bind(course_id)
        .fetch_optional(database)
        .await?
        .ok_or(Error::CourseNotFound(course_id))
}

pub async fn list_courses(database: &SqlitePool) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>("SELECT * FROM course ORDER BY title")
        .fetch_all(database)
        .await?;
    Ok(courses)
}

/// Courses a learner may see right now: visible, and either without a
/// visibility window or with `now` inside it.
pub async fn available_courses(database: &SqlitePool, now: OffsetDateTime) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT * FROM course \
         WHERE is_visible = 1 \
           AND ((visible_from IS NULL AND visible_until IS NULL) \
             OR (visible_from <= ? AND visible_until >= ?)) \
         ORDER BY title",
    )
    .bind(now)
    .bind(now)
    .fetch_all(database)
    .await?;
    Ok(courses)
}

pub async fn set_visibility(
    database: &SqlitePool,
    course_id: i64,
    is_visible: bool,
    window: Option<(OffsetDateTime, OffsetDateTime)>,
) -> Result<Course> {
    let (from, until) = match window {
        Some((from, until)) => (Some(from), Some(until)),
        None => (None, None),
    };
    let affected = sqlx::query(
        "UPDATE course SET is_visible = ?, visible_from = ?, visible_until = ? WHERE id = ?",
    )
    .bind(is_visible)
    .bind(from)
    .bind(until)
    .bind(course_id)
    .execute(database)
    .await?
    .rows_affected();
    if affected == 0 {
        return Err(Error::CourseNotFound(course_id));
    }
    get_course(database, course_id).await
}

/// Deletes a course with everything it owns. Resource files are removed
/// through `cleanup` first; lessons, resources, progress and enrollment rows
/// go with the course row via foreign-key cascade.
pub async fn delete_course(
    database: &SqlitePool,
    course_id: i64,
    cleanup: &dyn ResourceCleanup,
) -> Result<()> {
    let mut tx = database.begin().await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM course WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(Error::CourseNotFound(course_id));
    }
    let paths: Vec<String> = sqlx::query_scalar(
        "SELECT lesson_resource.path FROM lesson_resource \
         JOIN lesson ON lesson.id = lesson_resource.lesson_id \
         WHERE lesson.course_id = ?",
    )
    .bind(course_id)
    .fetch_all(&mut *tx)
    .await?;
    for path in &paths {
        run_cleanup(cleanup, path);
    }
    sqlx::query("DELETE FROM course WHERE id = ?")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    info!(course_id, resources = paths.len(), "deleted course");
    Ok(())
}

/// Enrolls a user in a course and seeds a zero course_progress row. A second
/// enrollment for the same pair is a `Conflict`.
pub async fn enroll(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<()> {
    let mut tx = database.begin().await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM course WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(Error::CourseNotFound(course_id));
    }
    let now = now_utc();
    sqlx::query("INSERT INTO enrollment (user_id, course_id, enrolled_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(course_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique(e, "user is already enrolled in this course"))?;
    sqlx::query(
        "INSERT INTO course_progress (user_id, course_id, progress_percentage, updated_at) \
         VALUES (?, ?, 0.0, ?) ON CONFLICT (user_id, course_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    info!(user_id, course_id, "enrolled user");
    Ok(())
}

pub async fn enrolled_courses(database: &SqlitePool, user_id: i64) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT course.* FROM course \
         JOIN enrollment ON enrollment.course_id = course.id \
         WHERE enrollment.user_id = ? ORDER BY course.title",
    )
    .bind(user_id)
    .fetch_all(database)
    .await?;
    Ok(courses)
}

pub async fn add_resource(
    database: &SqlitePool,
    lesson_id: i64,
    title: String,
    path: String,
) -> Result<LessonResource> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM lesson WHERE id = ?")
        .bind(lesson_id)
        .fetch_optional(database)
        .await?;
    if exists.is_none() {
        return Err(Error::LessonNotFound(lesson_id));
    }
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO lesson_resource (lesson_id, title, path, uploaded_at) VALUES (?, ?, ?, ?)",
    )
    .bind(lesson_id)
    .bind(&title)
    .bind(&path)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    Ok(LessonResource {
        id,
        lesson_id,
        title,
        path,
        uploaded_at: now,
    })
}

pub async fn lesson_resources(
    database: &SqlitePool,
    lesson_id: i64,
) -> Result<Vec<LessonResource>> {
    let resources = sqlx::query_as::<_, LessonResource>(
        "SELECT * FROM lesson_resource WHERE lesson_id = ? ORDER BY uploaded_at, id",
    )
    .bind(lesson_id)
    .fetch_all(database)
    .await?;
    Ok(resources)
}

pub async fn delete_resource(
    database: &SqlitePool,
    resource_id: i64,
    cleanup: &dyn ResourceCleanup,
) -> Result<()> {
    let path: Option<String> = sqlx::query_scalar("SELECT path FROM lesson_resource WHERE id = ?")
        .bind(resource_id)
        .fetch_optional(database)
        .await?;
    let path = path.ok_or(Error::ResourceNotFound(resource_id))?;
    run_cleanup(cleanup, &path);
    sqlx::query("DELETE FROM lesson_resource WHERE id = ?")
        .bind(resource_id)
        .execute(database)
        .await?;
    Ok(())
}
