pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("course {0} not found")]
    CourseNotFound(i64),
    #[error("lesson {0} not found")]
    LessonNotFound(i64),
    #[error("resource {0} not found")]
    ResourceNotFound(i64),
    #[error("no progress recorded for user {user_id} in course {course_id}")]
    ProgressNotFound { user_id: i64, course_id: i64 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::CourseNotFound(_)
                | Error::LessonNotFound(_)
                | Error::ResourceNotFound(_)
                | Error::ProgressNotFound { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Whether the failure is transient (SQLITE_BUSY, or a stale-snapshot
    /// write upgrade under WAL) and the whole operation can be retried.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("5") | Some("517"))
            }
            _ => false,
        }
    }
}

/// Maps a unique-key violation to `Conflict`, passing other database errors
/// through unchanged.
pub(crate) fn map_unique(err: sqlx::Error, context: &str) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.kind() == sqlx::error::ErrorKind::UniqueViolation {
            return Error::Conflict(context.to_string());
        }
    }
    Error::Database(err)
}
