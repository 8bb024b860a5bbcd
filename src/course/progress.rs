use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::now_utc;

/// Upserts the per-lesson completion flag and recomputes the course
/// percentage from the new completion set. Returns the stored percentage.
pub async fn set_lesson_completed(
    database: &SqlitePool,
    user_id: i64,
    lesson_id: i64,
    completed: bool,
) -> Result<f64> {
    let course_id: Option<i64> = sqlx::query_scalar("SELECT course_id FROM lesson WHERE id = ?")
        .bind(lesson_id)
        .fetch_optional(database)
        .await?;
    let course_id = course_id.ok_or(Error::LessonNotFound(lesson_id))?;
    sqlx::query(
        "INSERT INTO lesson_progress (user_id, lesson_id, completed, updated_at) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (user_id, lesson_id) \
         DO UPDATE SET completed = excluded.completed, updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(lesson_id)
    .bind(completed)
    .bind(now_utc())
    .execute(database)
    .await?;
    recompute(database, user_id, course_id).await
}

/// Derives the completion percentage from scratch (never patched
/// incrementally) and upserts it into course_progress. A course without
/// lessons counts as 0 %. Idempotent; concurrent recomputes for the same
/// pair are last-write-wins, each consistent with the snapshot it read.
pub async fn recompute(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<f64> {
    let mut tx = database.begin().await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM course WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(Error::CourseNotFound(course_id));
    }
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lesson WHERE course_id = ?")
        .bind(course_id)
        .fetch_one(&mut *tx)
        .await?;
    let done: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM lesson_progress \
         JOIN lesson ON lesson.id = lesson_progress.lesson_id \
         WHERE lesson_progress.user_id = ? AND lesson.course_id = ? \
           AND lesson_progress.completed = 1",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(&mut *tx)
    .await?;
    let percentage = if total == 0 {
        0.0
    } else {
        done as f64 / total as f64 * 100.0
    };
    sqlx::query(
        "INSERT INTO course_progress (user_id, course_id, progress_percentage, updated_at) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (user_id, course_id) \
         DO UPDATE SET progress_percentage = excluded.progress_percentage, \
                       updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(percentage)
    .bind(now_utc())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    debug!(user_id, course_id, done, total, percentage, "recomputed course progress");
    Ok(percentage)
}

/// The stored percentage for a (user, course) pair. Never recomputes: a
/// value gone stale through a lesson add or remove stays stale until the
/// next completion update.
pub async fn course_progress(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<f64> {
    sqlx::query_scalar(
        "SELECT progress_percentage FROM course_progress WHERE user_id = ? AND course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(database)
    .await?
    .ok_or(Error::ProgressNotFound { user_id, course_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::sequencer::{Lesson, NewLesson, delete_lesson, insert_lesson, list_lessons};
    use crate::course::store::{self, NewCourse, NoCleanup};
    use crate::db::connect_memory;

    async fn course_with_lessons(database: &SqlitePool, count: usize) -> (i64, Vec<Lesson>) {
        let course = store::create_course(
            database,
            NewCourse {
                title: "test course".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
        for i in 1..=count {
            insert_lesson(
                database,
                course.id,
                i as i64,
                NewLesson {
                    title: format!("lesson {i}"),
                    content: None,
                },
            )
            .await
            .unwrap();
        }
        let lessons = list_lessons(database, course.id).await.unwrap();
        (course.id, lessons)
    }

    #[tokio::test]
    async fn percentage_follows_completions() {
        let db = connect_memory().await;
        let (course_id, lessons) = course_with_lessons(&db, 4).await;

        let pct = set_lesson_completed(&db, 1, lessons[0].id, true).await.unwrap();
        assert_eq!(pct, 25.0);
        let pct = set_lesson_completed(&db, 1, lessons[2].id, true).await.unwrap();
        assert_eq!(pct, 50.0);
        assert_eq!(course_progress(&db, 1, course_id).await.unwrap(), 50.0);

        // marking incomplete again drops the percentage
        let pct = set_lesson_completed(&db, 1, lessons[2].id, false).await.unwrap();
        assert_eq!(pct, 25.0);
    }

    #[tokio::test]
    async fn empty_course_recomputes_to_zero() {
        let db = connect_memory().await;
        let (course_id, _) = course_with_lessons(&db, 0).await;
        assert_eq!(recompute(&db, 9, course_id).await.unwrap(), 0.0);
        assert_eq!(course_progress(&db, 9, course_id).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let db = connect_memory().await;
        let (course_id, lessons) = course_with_lessons(&db, 3).await;
        set_lesson_completed(&db, 1, lessons[0].id, true).await.unwrap();
        let first = recompute(&db, 1, course_id).await.unwrap();
        let second = recompute(&db, 1, course_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(course_progress(&db, 1, course_id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn progress_before_any_recompute_is_not_found() {
        let db = connect_memory().await;
        let (course_id, _) = course_with_lessons(&db, 2).await;
        let err = course_progress(&db, 1, course_id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProgressNotFound { user_id: 1, .. }
        ));
    }

    #[tokio::test]
    async fn completing_missing_lesson_is_not_found() {
        let db = connect_memory().await;
        let err = set_lesson_completed(&db, 1, 42, true).await.unwrap_err();
        assert!(matches!(err, Error::LessonNotFound(42)));
    }

    #[tokio::test]
    async fn lesson_progress_cascades_with_lesson() {
        let db = connect_memory().await;
        let (course_id, lessons) = course_with_lessons(&db, 2).await;
        set_lesson_completed(&db, 1, lessons[0].id, true).await.unwrap();

        delete_lesson(&db, lessons[0].id, &NoCleanup).await.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lesson_progress WHERE lesson_id = ?")
            .bind(lessons[0].id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(rows, 0);

        // stored percentage is stale until the next completion update
        assert_eq!(course_progress(&db, 1, course_id).await.unwrap(), 50.0);
        assert_eq!(recompute(&db, 1, course_id).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn progress_tracked_per_user() {
        let db = connect_memory().await;
        let (course_id, lessons) = course_with_lessons(&db, 2).await;
        set_lesson_completed(&db, 1, lessons[0].id, true).await.unwrap();
        set_lesson_completed(&db, 2, lessons[0].id, true).await.unwrap();
        set_lesson_completed(&db, 2, lessons[1].id, true).await.unwrap();
        assert_eq!(course_progress(&db, 1, course_id).await.unwrap(), 50.0);
        assert_eq!(course_progress(&db, 2, course_id).await.unwrap(), 100.0);
    }
}
