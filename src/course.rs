pub mod progress;
pub mod sequencer;
pub mod store;

pub use progress::{course_progress, recompute, set_lesson_completed};
pub use sequencer::{Lesson, NewLesson, delete_lesson, insert_lesson, list_lessons, reconcile};
pub use store::{Course, LessonResource, MediaStore, NewCourse, NoCleanup, ResourceCleanup};
