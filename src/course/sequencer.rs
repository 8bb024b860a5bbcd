use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use super::store::{ResourceCleanup, run_cleanup};
use crate::error::{Error, Result};

/// How many times an insert is retried when two writers race on the same
/// course and one of them loses its snapshot or hits the write lock.
const INSERT_RETRIES: u32 = 5;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    /// 1-based dense rank within the course.
    #[sqlx(rename = "ord")]
    pub order: i64,
    pub title: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLesson {
    pub title: String,
    pub content: Option<String>,
}

/// Parses a requested order coming in over the wire. The typed operations
/// below clamp out-of-range values themselves; this is the API edge where
/// garbage input is rejected instead.
pub fn parse_requested_order(raw: &str) -> Result<i64> {
    let order: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("order must be an integer, got {raw:?}")))?;
    if order < 1 {
        return Err(Error::InvalidArgument(format!(
            "order must be a positive integer, got {order}"
        )));
    }
    Ok(order)
}

/// Inserts a lesson at `requested_order`, clamped into `1..=N+1`, shifting
/// everything at or after the slot up by one. The shift and the insert commit
/// together; after commit the course's orders are exactly `1..=N+1`.
pub async fn insert_lesson(
    database: &SqlitePool,
    course_id: i64,
    requested_order: i64,
    lesson: NewLesson,
) -> Result<Lesson> {
    if lesson.title.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "lesson title must not be empty".to_string(),
        ));
    }
    let mut attempt = 0;
    loop {
        match try_insert(database, course_id, requested_order, &lesson).await {
            Err(e) if e.is_retryable() && attempt < INSERT_RETRIES => {
                attempt += 1;
                debug!(course_id, attempt, "insert contended, retrying: {}", e);
            }
            other => return other,
        }
    }
}

async fn try_insert(
    database: &SqlitePool,
    course_id: i64,
    requested_order: i64,
    lesson: &NewLesson,
) -> Result<Lesson> {
    let mut tx = database.begin().await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM course WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(Error::CourseNotFound(course_id));
    }
    let max_order: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(ord), 0) FROM lesson WHERE course_id = ?")
            .bind(course_id)
            .fetch_one(&mut *tx)
            .await?;
    let order = requested_order.clamp(1, max_order + 1);
    sqlx::query("UPDATE lesson SET ord = ord + 1 WHERE course_id = ? AND ord >= ?")
        .bind(course_id)
        .bind(order)
        .execute(&mut *tx)
        .await?;
    let id = sqlx::query("INSERT INTO lesson (course_id, ord, title, content) VALUES (?, ?, ?, ?)")
        .bind(course_id)
        .bind(order)
        .bind(&lesson.title)
        .bind(&lesson.content)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
    tx.commit().await?;
    info!(course_id, lesson_id = id, order, "inserted lesson");
    Ok(Lesson {
        id,
        course_id,
        order,
        title: lesson.title.clone(),
        content: lesson.content.clone(),
    })
}

/// Deletes a lesson and closes the gap it leaves: resource files go through
/// `cleanup`, the row delete cascades to resources and progress rows, every
/// later lesson moves down one slot, and a reconciliation walk re-assigns any
/// order that still disagrees with its 1-based position. The walk is a no-op
/// on a healthy course but restores density even if the course was corrupted
/// before the call.
pub async fn delete_lesson(
    database: &SqlitePool,
    lesson_id: i64,
    cleanup: &dyn ResourceCleanup,
) -> Result<()> {
    let mut tx = database.begin().await?;
    let row: Option<(i64, i64)> = sqlx::query_as("SELECT course_id, ord FROM lesson WHERE id = ?")
        .bind(lesson_id)
        .fetch_optional(&mut *tx)
        .await?;
    let (course_id, deleted_order) = row.ok_or(Error::LessonNotFound(lesson_id))?;
    let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM lesson_resource WHERE lesson_id = ?")
        .bind(lesson_id)
        .fetch_all(&mut *tx)
        .await?;
    for path in &paths {
        run_cleanup(cleanup, path);
    }
    sqlx::query("DELETE FROM lesson WHERE id = ?")
        .bind(lesson_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE lesson SET ord = ord - 1 WHERE course_id = ? AND ord > ?")
        .bind(course_id)
        .bind(deleted_order)
        .execute(&mut *tx)
        .await?;
    reconcile_tx(&mut tx, course_id).await?;
    tx.commit().await?;
    info!(course_id, lesson_id, deleted_order, "deleted lesson");
    Ok(())
}

/// Lessons of a course by ascending order. Read-only.
pub async fn list_lessons(database: &SqlitePool, course_id: i64) -> Result<Vec<Lesson>> {
    let lessons =
        sqlx::query_as::<_, Lesson>("SELECT * FROM lesson WHERE course_id = ? ORDER BY ord")
            .bind(course_id)
            .fetch_all(database)
            .await?;
    Ok(lessons)
}

/// Re-assigns orders to the 1-based walk position wherever they disagree.
/// Returns how many rows were touched; idempotent.
pub async fn reconcile(database: &SqlitePool, course_id: i64) -> Result<u64> {
    let mut tx = database.begin().await?;
    let changed = reconcile_tx(&mut tx, course_id).await?;
    tx.commit().await?;
    Ok(changed)
}

async fn reconcile_tx(tx: &mut Transaction<'_, Sqlite>, course_id: i64) -> Result<u64> {
    let rows: Vec<(i64, i64)> =
        sqlx::query_as("SELECT id, ord FROM lesson WHERE course_id = ? ORDER BY ord, id")
            .bind(course_id)
            .fetch_all(&mut **tx)
            .await?;
    let mut changed = 0;
    for (position, (id, order)) in rows.into_iter().enumerate() {
        let expected = position as i64 + 1;
        if order != expected {
            sqlx::query("UPDATE lesson SET ord = ? WHERE id = ?")
                .bind(expected)
                .bind(id)
                .execute(&mut **tx)
                .await?;
            changed += 1;
        }
    }
    if changed > 0 {
        warn!(course_id, changed, "healed lesson ordering");
    }
    Ok(changed)
}
